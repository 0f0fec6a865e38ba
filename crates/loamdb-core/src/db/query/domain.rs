use crate::{error::Error, value::Value};

///
/// DomainItem
///
/// One element of the list form: a prefix boolean operator or a
/// `(path, operator, value)` leaf.
///

#[derive(Clone, Debug, PartialEq)]
pub enum DomainItem {
    And,
    Or,
    Not,
    Leaf {
        path: String,
        op: String,
        value: Value,
    },
}

impl DomainItem {
    pub fn leaf(path: impl Into<String>, op: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Leaf {
            path: path.into(),
            op: op.into(),
            value: value.into(),
        }
    }

    /// Prefix operator from its literal form. Only `&`, `|`, `!` exist;
    /// anything else is a caller bug.
    pub fn prefix(op: &str) -> Self {
        match op {
            "&" => Self::And,
            "|" => Self::Or,
            "!" => Self::Not,
            other => panic!("unknown domain prefix operator '{other}'"),
        }
    }
}

///
/// Domain
///
/// Filter in list form: prefix `&`/`|`/`!` operators and
/// `(path, operator, value)` leaves. Consecutive terms without an explicit
/// prefix are conjoined. The empty domain matches everything.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Domain {
    items: Vec<DomainItem>,
}

impl Domain {
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    #[must_use]
    pub fn from_items(items: Vec<DomainItem>) -> Self {
        Self { items }
    }

    #[must_use]
    pub fn leaf(path: impl Into<String>, op: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            items: vec![DomainItem::leaf(path, op, value)],
        }
    }

    #[must_use]
    pub fn items(&self) -> &[DomainItem] {
        &self.items
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Conjoin another domain, in list form.
    #[must_use]
    pub fn and(mut self, other: Self) -> Self {
        if self.items.is_empty() {
            return other;
        }
        if other.items.is_empty() {
            return self;
        }
        let mut items = vec![DomainItem::And];
        items.append(&mut self.items);
        items.extend(other.items);
        Self { items }
    }

    /// Parse the list form into the typed AST. Done once per operation;
    /// everything downstream works on the AST.
    pub fn parse(&self) -> Result<DomainExpr, Error> {
        if self.items.is_empty() {
            return Ok(DomainExpr::True);
        }
        let mut pos = 0;
        let mut terms = Vec::new();
        while pos < self.items.len() {
            terms.push(parse_one(&self.items, &mut pos)?);
        }
        Ok(match terms.len() {
            1 => terms.pop().unwrap_or(DomainExpr::True),
            _ => DomainExpr::And(terms),
        })
    }
}

fn parse_one(items: &[DomainItem], pos: &mut usize) -> Result<DomainExpr, Error> {
    let item = items
        .get(*pos)
        .ok_or_else(|| Error::validation("domain prefix operator is missing an operand"))?;
    *pos += 1;

    match item {
        DomainItem::And => {
            let left = parse_one(items, pos)?;
            let right = parse_one(items, pos)?;
            Ok(DomainExpr::And(vec![left, right]))
        }
        DomainItem::Or => {
            let left = parse_one(items, pos)?;
            let right = parse_one(items, pos)?;
            Ok(DomainExpr::Or(vec![left, right]))
        }
        DomainItem::Not => Ok(DomainExpr::Not(Box::new(parse_one(items, pos)?))),
        DomainItem::Leaf { path, op, value } => {
            let op = DomainOp::parse(op)
                .ok_or_else(|| Error::validation(format!("unknown domain operator '{op}'")))?;
            if path.is_empty() {
                return Err(Error::validation("empty field path in domain leaf"));
            }
            Ok(DomainExpr::Leaf(DomainLeaf {
                path: path.split('.').map(ToString::to_string).collect(),
                op,
                value: value.clone(),
            }))
        }
    }
}

///
/// DomainOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DomainOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    /// Substring match: the value is wrapped in `%...%`.
    Like,
    /// Case-insensitive substring match.
    Ilike,
    /// Raw pattern match (`%`/`_` wildcards supplied by the caller).
    EqLike,
    EqIlike,
    /// Record or any of its descendants through the parent field.
    ChildOf,
    ParentOf,
}

impl DomainOp {
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            "in" => Some(Self::In),
            "not in" => Some(Self::NotIn),
            "like" => Some(Self::Like),
            "ilike" => Some(Self::Ilike),
            "=like" => Some(Self::EqLike),
            "=ilike" => Some(Self::EqIlike),
            "child_of" => Some(Self::ChildOf),
            "parent_of" => Some(Self::ParentOf),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::In | Self::ChildOf | Self::ParentOf => "IN",
            Self::NotIn => "NOT IN",
            Self::Like | Self::EqLike => "LIKE",
            Self::Ilike | Self::EqIlike => "ILIKE",
        }
    }
}

///
/// DomainExpr
///
/// Typed AST produced by `Domain::parse`.
///

#[derive(Clone, Debug, PartialEq)]
pub enum DomainExpr {
    /// The empty domain.
    True,
    And(Vec<DomainExpr>),
    Or(Vec<DomainExpr>),
    Not(Box<DomainExpr>),
    Leaf(DomainLeaf),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DomainLeaf {
    /// Dotted path split into segments; all but the last must be
    /// single-valued relations.
    pub path: Vec<String>,
    pub op: DomainOp,
    pub value: Value,
}

impl DomainExpr {
    /// Conjoin two parsed expressions.
    #[must_use]
    pub fn and_expr(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, e) | (e, Self::True) => e,
            (Self::And(mut a), Self::And(b)) => {
                a.extend(b);
                Self::And(a)
            }
            (Self::And(mut a), e) => {
                a.push(e);
                Self::And(a)
            }
            (a, b) => Self::And(vec![a, b]),
        }
    }
}
