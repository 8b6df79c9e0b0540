//! Version expressions
//!
//! Every definition of an update file is scoped by a boolean expression over the version
//! being installed, e.g. `version==latest` or `version >= 2 && version < 5`. Expressions
//! support integer, string and boolean literals, variables, the comparison operators in
//! symbol (`==`, `!=`, `<`, `<=`, `>`, `>=`) and word (`eq`, `ne`, `lt`, `le`, `gt`, `ge`)
//! form, and the logical operators `&&`, `||`, `!` as well as `and`, `or`, `not`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::errors::SerializationError;

mod parser;

use parser::{CmpOp, Expr};

/// The expression evaluated when a definition does not declare one
pub const DEFAULT_EXPRESSION: &str = "version==latest";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("invalid expression '{expression}' at {position}: {message}")]
    Syntax {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("expression '{0}' does not evaluate to a boolean")]
    NotBoolean(String),
}

/// A value an expression operates on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Boolean(bool),
    Integer(i64),
    Text(String),
}

impl Scalar {
    fn kind(&self) -> &'static str {
        match self {
            Scalar::Boolean(_) => "boolean",
            Scalar::Integer(_) => "integer",
            Scalar::Text(_) => "string",
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

/// Variables available to version expressions
///
/// `version` and `latest` are always defined, additional variables can be provided with
/// [VersionContext::with_variable].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct VersionContext {
    pub version: i64,
    pub latest: i64,
    pub variables: BTreeMap<String, Scalar>,
}

impl VersionContext {
    pub fn new(version: i64, latest: i64) -> Self {
        Self {
            version,
            latest,
            variables: BTreeMap::new(),
        }
    }

    /// Context for installing the latest version
    pub fn latest(version: i64) -> Self {
        Self::new(version, version)
    }

    pub fn with_variable(self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        let mut ctx = self;
        ctx.variables.insert(name.into(), value.into());
        ctx
    }

    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(json)?)
    }

    fn lookup(&self, name: &str) -> Option<Scalar> {
        match name {
            "version" => Some(Scalar::Integer(self.version)),
            "latest" => Some(Scalar::Integer(self.latest)),
            _ => self.variables.get(name).cloned(),
        }
    }
}

/// A parsed version expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    expr: Expr,
}

impl Default for Expression {
    fn default() -> Self {
        Self {
            source: DEFAULT_EXPRESSION.to_string(),
            expr: Expr::Compare(
                CmpOp::Eq,
                Box::new(Expr::Variable("version".to_string())),
                Box::new(Expr::Variable("latest".to_string())),
            ),
        }
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Expression {
    pub fn parse(src: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            source: src.trim().to_string(),
            expr: parser::parse(src)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the expression, failing if the result is not a boolean
    pub fn evaluate(&self, ctx: &VersionContext) -> Result<bool, ExpressionError> {
        match eval(&self.expr, ctx)? {
            Scalar::Boolean(b) => Ok(b),
            _ => Err(ExpressionError::NotBoolean(self.source.clone())),
        }
    }
}

fn boolean(value: Scalar, op: &'static str) -> Result<bool, ExpressionError> {
    match value {
        Scalar::Boolean(b) => Ok(b),
        other => Err(ExpressionError::TypeMismatch {
            op,
            left: other.kind(),
            right: "boolean",
        }),
    }
}

fn eval(expr: &Expr, ctx: &VersionContext) -> Result<Scalar, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(name) => ctx
            .lookup(name)
            .ok_or_else(|| ExpressionError::UnknownVariable(name.clone())),
        Expr::Not(inner) => Ok(Scalar::Boolean(!boolean(eval(inner, ctx)?, "!")?)),
        Expr::And(left, right) => {
            if !boolean(eval(left, ctx)?, "&&")? {
                return Ok(Scalar::Boolean(false));
            }
            Ok(Scalar::Boolean(boolean(eval(right, ctx)?, "&&")?))
        }
        Expr::Or(left, right) => {
            if boolean(eval(left, ctx)?, "||")? {
                return Ok(Scalar::Boolean(true));
            }
            Ok(Scalar::Boolean(boolean(eval(right, ctx)?, "||")?))
        }
        Expr::Compare(op, left, right) => {
            let left = eval(left, ctx)?;
            let right = eval(right, ctx)?;
            compare(*op, &left, &right).map(Scalar::Boolean)
        }
    }
}

fn compare(op: CmpOp, left: &Scalar, right: &Scalar) -> Result<bool, ExpressionError> {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (Scalar::Integer(l), Scalar::Integer(r)) => Some(l.cmp(r)),
        (Scalar::Text(l), Scalar::Text(r)) => Some(l.cmp(r)),
        (Scalar::Boolean(l), Scalar::Boolean(r)) => Some(l.cmp(r)),
        _ => None,
    };

    match (op, ordering) {
        (CmpOp::Eq, Some(o)) => Ok(o == Ordering::Equal),
        (CmpOp::Ne, Some(o)) => Ok(o != Ordering::Equal),
        // values of different kinds are never equal
        (CmpOp::Eq, None) => Ok(false),
        (CmpOp::Ne, None) => Ok(true),
        (_, Some(_)) if matches!(left, Scalar::Boolean(_)) => Err(ExpressionError::TypeMismatch {
            op: op.as_str(),
            left: left.kind(),
            right: right.kind(),
        }),
        (CmpOp::Lt, Some(o)) => Ok(o == Ordering::Less),
        (CmpOp::Le, Some(o)) => Ok(o != Ordering::Greater),
        (CmpOp::Gt, Some(o)) => Ok(o == Ordering::Greater),
        (CmpOp::Ge, Some(o)) => Ok(o != Ordering::Less),
        (_, None) => Err(ExpressionError::TypeMismatch {
            op: op.as_str(),
            left: left.kind(),
            right: right.kind(),
        }),
    }
}
