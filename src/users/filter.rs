//! Enumerated filters for `GET /api/users`.
//!
//! Query parameters take the form `field=value` (equality) or
//! `field__op=value`. Only the fields and operators listed here are
//! accepted; anything else is rejected with a validation error.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use sqlx::{Postgres, QueryBuilder};

use crate::error::{AppError, AppResult};
use crate::users::repo_types::{Role, User};

pub const MAX_CONDITIONS: usize = 16;

/// Keys consumed elsewhere (pagination) or by the sort clause.
const RESERVED_PARAMS: [&str; 4] = ["page", "perPage", "sort", "order"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Username,
    FirstName,
    LastName,
    Email,
    Phone,
    Address,
    Role,
    Amount,
}

impl FilterField {
    fn from_param(name: &str) -> Option<Self> {
        Some(match name {
            "username" => Self::Username,
            "firstName" => Self::FirstName,
            "lastName" => Self::LastName,
            "email" => Self::Email,
            "phone" => Self::Phone,
            "address" => Self::Address,
            "role" => Self::Role,
            "amount" => Self::Amount,
            _ => return None,
        })
    }

    fn column(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Address => "address",
            Self::Role => "role",
            Self::Amount => "amount",
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Self::Amount)
    }

    fn text_of(self, user: &User) -> &str {
        match self {
            Self::Username => &user.username,
            Self::FirstName => &user.first_name,
            Self::LastName => &user.last_name,
            Self::Email => &user.email,
            Self::Phone => &user.phone,
            Self::Address => &user.address,
            Self::Role => &user.role,
            Self::Amount => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Like,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "like" => Self::Like,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            _ => return None,
        })
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Like => "ILIKE",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    fn accepts(self, field: FilterField) -> bool {
        match self {
            Self::Eq | Self::Ne => true,
            Self::Like => !field.is_numeric(),
            Self::Gt | Self::Gte | Self::Lt | Self::Lte => field.is_numeric(),
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Gt => ord == Ordering::Greater,
            Self::Gte => ord != Ordering::Less,
            Self::Lt => ord == Ordering::Less,
            Self::Lte => ord != Ordering::Greater,
            Self::Like => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: FilterField,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl Condition {
    fn matches(&self, user: &User) -> bool {
        match (&self.value, self.op) {
            (FilterValue::Int(v), op) => op.holds(user.amount.cmp(v)),
            (FilterValue::Text(v), FilterOp::Like) => self
                .field
                .text_of(user)
                .to_lowercase()
                .contains(&v.to_lowercase()),
            (FilterValue::Text(v), op) => op.holds(self.field.text_of(user).cmp(v.as_str())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Id,
    Username,
    Amount,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    fn from_param(name: &str) -> Option<Self> {
        Some(match name {
            "id" => Self::Id,
            "username" => Self::Username,
            "amount" => Self::Amount,
            "createdAt" => Self::CreatedAt,
            "updatedAt" => Self::UpdatedAt,
            _ => return None,
        })
    }

    fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Username => "username",
            Self::Amount => "amount",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub conditions: Vec<Condition>,
    pub sort: SortField,
    pub order: SortOrder,
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn parse_condition(key: &str, raw: &str) -> AppResult<Condition> {
    let (name, op) = match key.split_once("__") {
        Some((name, suffix)) => {
            let op = FilterOp::from_suffix(suffix)
                .ok_or_else(|| AppError::Validation(format!("unsupported operator: {suffix}")))?;
            (name, op)
        }
        None => (key, FilterOp::Eq),
    };

    let field = FilterField::from_param(name)
        .ok_or_else(|| AppError::Validation(format!("unsupported filter: {name}")))?;

    if !op.accepts(field) {
        return Err(AppError::Validation(format!(
            "operator {} is not supported for {name}",
            op.sql()
        )));
    }

    let value = if field.is_numeric() {
        let n = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| AppError::Validation(format!("{name} must be an integer")))?;
        FilterValue::Int(n)
    } else if field == FilterField::Role && op != FilterOp::Like {
        let role: Role = raw.parse().map_err(AppError::Validation)?;
        FilterValue::Text(role.as_str().to_string())
    } else {
        FilterValue::Text(raw.to_string())
    };

    Ok(Condition { field, op, value })
}

impl UserFilter {
    /// Builds a filter from raw query parameters, ignoring pagination keys.
    pub fn from_params(params: &HashMap<String, String>) -> AppResult<Self> {
        // Sorted so the generated SQL is stable for a given request.
        let sorted: BTreeMap<&str, &str> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut filter = UserFilter::default();

        for (key, raw) in &sorted {
            if RESERVED_PARAMS.contains(key) {
                continue;
            }
            filter.conditions.push(parse_condition(key, raw)?);
        }

        if filter.conditions.len() > MAX_CONDITIONS {
            return Err(AppError::Validation(format!(
                "at most {MAX_CONDITIONS} filters are allowed"
            )));
        }

        if let Some(sort) = sorted.get("sort") {
            filter.sort = SortField::from_param(sort)
                .ok_or_else(|| AppError::Validation(format!("unsupported sort field: {sort}")))?;
        }

        if let Some(order) = sorted.get("order") {
            filter.order = match order.to_lowercase().as_str() {
                "asc" => SortOrder::Asc,
                "desc" => SortOrder::Desc,
                _ => return Err(AppError::Validation(format!("unsupported order: {order}"))),
            };
        }

        Ok(filter)
    }

    pub fn matches(&self, user: &User) -> bool {
        self.conditions.iter().all(|c| c.matches(user))
    }

    /// Ordering used by in-memory listings; mirrors [`Self::push_order_by`].
    pub fn compare(&self, a: &User, b: &User) -> Ordering {
        let primary = match self.sort {
            SortField::Id => a.id.cmp(&b.id),
            SortField::Username => a.username.cmp(&b.username),
            SortField::Amount => a.amount.cmp(&b.amount),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        };
        let primary = match self.order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }

    pub fn push_where<'a>(&self, qb: &mut QueryBuilder<'a, Postgres>) {
        for (i, c) in self.conditions.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            qb.push(c.field.column());
            qb.push(" ");
            qb.push(c.op.sql());
            qb.push(" ");
            match (&c.value, c.op) {
                (FilterValue::Text(v), FilterOp::Like) => {
                    qb.push_bind(format!("%{}%", escape_like(v)));
                }
                (FilterValue::Text(v), _) => {
                    qb.push_bind(v.clone());
                }
                (FilterValue::Int(v), _) => {
                    qb.push_bind(*v);
                }
            }
        }
    }

    pub fn push_order_by<'a>(&self, qb: &mut QueryBuilder<'a, Postgres>) {
        let direction = match self.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        qb.push(" ORDER BY ");
        qb.push(self.sort.column());
        qb.push(" ");
        qb.push(direction);
        if self.sort != SortField::Id {
            qb.push(", id ASC");
        }
    }
}
