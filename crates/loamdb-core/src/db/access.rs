use crate::{db::env::Env, db::query::Domain, error::Error, registry::Field};
use std::collections::{BTreeMap, BTreeSet};

/// The superuser; bypasses every access layer, like `sudo()`.
pub const ROOT_USER: i64 = 1;

///
/// AccessOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessOp {
    Read,
    Write,
    Create,
    Unlink,
}

impl AccessOp {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Create => "create",
            Self::Unlink => "unlink",
        }
    }
}

///
/// Perms
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Perms {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub unlink: bool,
}

impl Perms {
    #[must_use]
    pub const fn all() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            unlink: true,
        }
    }

    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            create: false,
            unlink: false,
        }
    }

    #[must_use]
    pub const fn grants(&self, op: AccessOp) -> bool {
        match op {
            AccessOp::Read => self.read,
            AccessOp::Write => self.write,
            AccessOp::Create => self.create,
            AccessOp::Unlink => self.unlink,
        }
    }
}

///
/// Acl
///
/// Entity-level permission grant for one group. An entity with no ACLs at
/// all is open to every user; once any ACL targets it, access is
/// grant-based.
///

#[derive(Clone, Debug)]
pub struct Acl {
    pub model: String,
    pub group: String,
    pub perms: Perms,
}

///
/// RecordRule
///
/// Access filter conjoined into every non-superuser operation it applies
/// to. Rules with groups apply to members only; global rules (no groups)
/// apply to everyone.
///

#[derive(Clone, Debug)]
pub struct RecordRule {
    pub model: String,
    pub groups: Vec<String>,
    pub perms: Perms,
    pub domain: Domain,
}

///
/// AccessRegistry
///

#[derive(Clone, Debug, Default)]
pub struct AccessRegistry {
    acls: Vec<Acl>,
    rules: Vec<RecordRule>,
    user_groups: BTreeMap<i64, BTreeSet<String>>,
}

impl AccessRegistry {
    pub fn add_acl(&mut self, acl: Acl) {
        self.acls.push(acl);
    }

    pub fn add_rule(&mut self, rule: RecordRule) {
        self.rules.push(rule);
    }

    pub fn add_user_group(&mut self, user: i64, group: &str) {
        self.user_groups
            .entry(user)
            .or_default()
            .insert(group.to_string());
    }

    #[must_use]
    pub fn user_in_group(&self, user: i64, group: &str) -> bool {
        self.user_groups
            .get(&user)
            .is_some_and(|groups| groups.contains(group))
    }

    #[must_use]
    pub fn user_in_any(&self, user: i64, groups: &[String]) -> bool {
        groups.iter().any(|g| self.user_in_group(user, g))
    }

    fn acls_for(&self, model: &str) -> impl Iterator<Item = &Acl> {
        self.acls.iter().filter(move |acl| acl.model == model)
    }

    /// Record-rule domains applying to the user for one operation.
    #[must_use]
    pub fn rule_domains(&self, user: i64, model: &str, op: AccessOp) -> Vec<Domain> {
        self.rules
            .iter()
            .filter(|rule| rule.model == model && rule.perms.grants(op))
            .filter(|rule| rule.groups.is_empty() || self.user_in_any(user, &rule.groups))
            .map(|rule| rule.domain.clone())
            .collect()
    }
}

/// Entity-level ACL check. Superuser and `sudo` environments bypass it.
pub fn check_model_access(env: &Env, model: &str, op: AccessOp) -> Result<(), Error> {
    if env.is_superuser() {
        return Ok(());
    }
    let registry = env.registry();
    let access = registry.access();
    let mut saw_acl = false;
    for acl in access.acls_for(model) {
        saw_acl = true;
        if acl.perms.grants(op) && access.user_in_group(env.user(), &acl.group) {
            return Ok(());
        }
    }
    if saw_acl {
        return Err(Error::access(
            model,
            format!("user {} may not {} this entity", env.user(), op.label()),
        ));
    }
    Ok(())
}

/// Field-level group check; applies to both read and write.
pub fn check_field_access(env: &Env, model: &str, field: &Field) -> Result<(), Error> {
    if env.is_superuser() || field.groups.is_empty() {
        return Ok(());
    }
    let registry = env.registry();
    if registry.access().user_in_any(env.user(), &field.groups) {
        return Ok(());
    }
    Err(Error::access(
        model,
        format!("field '{}' is restricted", field.name),
    ))
}
