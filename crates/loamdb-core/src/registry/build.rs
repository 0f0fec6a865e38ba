use crate::{
    db::{
        access::{AccessRegistry, Acl, Perms, RecordRule},
        query::{Domain, parse_order},
        triggers::DependencyGraph,
    },
    error::Error,
    registry::{Field, InboundRef, Model, Registry, schema_info},
    schema::{EntityDef, FieldDef, FieldStorage, OnDelete},
    value::FieldKind,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    mem::discriminant,
    rc::Rc,
};

///
/// RegistryBuilder
///
/// Collects entity declarations and access data, then compiles the
/// effective models in deterministic, dependencies-first order.
///

#[derive(Default)]
pub struct RegistryBuilder {
    defs: Vec<EntityDef>,
    access: AccessRegistry,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, def: EntityDef) -> Self {
        self.defs.push(def);
        self
    }

    pub fn acl(mut self, model: &str, group: &str, perms: Perms) -> Self {
        self.access.add_acl(Acl {
            model: model.to_string(),
            group: group.to_string(),
            perms,
        });
        self
    }

    pub fn record_rule(
        mut self,
        model: &str,
        groups: &[&str],
        perms: Perms,
        domain: Domain,
    ) -> Self {
        self.access.add_rule(RecordRule {
            model: model.to_string(),
            groups: groups.iter().map(ToString::to_string).collect(),
            perms,
            domain,
        });
        self
    }

    pub fn user_group(mut self, user: i64, group: &str) -> Self {
        self.access.add_user_group(user, group);
        self
    }

    pub fn build(self) -> Result<Registry, Error> {
        let merged = merge_declarations(self.defs)?;
        let ordered = delegation_order(&merged)?;

        // Compile models parents-first so delegated fields can be
        // materialized from the parent's compiled field map.
        let mut models: BTreeMap<String, Rc<Model>> = BTreeMap::new();
        for name in &ordered {
            let def = &merged[name];
            let model = compile_model(def, &models)?;
            models.insert(name.clone(), Rc::new(model));
        }

        validate_models(&models)?;

        let graph = DependencyGraph::build(&models)?;
        let ranks = compute_ranks(&models, &graph);
        let (inbound, o2m_by_inverse) = relation_maps(&models);

        let tables = models
            .values()
            .map(|model| {
                let info = schema_info::build_table_info(model, |field| {
                    let rule = model
                        .field(field)
                        .map(|f| f.ondelete)
                        .unwrap_or_default();
                    match rule {
                        OnDelete::Restrict => "RESTRICT".to_string(),
                        OnDelete::Cascade => "CASCADE".to_string(),
                        OnDelete::SetNull => "SET NULL".to_string(),
                    }
                });
                (model.name.clone(), info)
            })
            .collect();

        Ok(Registry {
            models,
            graph,
            inbound,
            o2m_by_inverse,
            ranks,
            access: self.access,
            tables,
        })
    }
}

/// Merge all declarations targeting the same name into one. Extensions must
/// follow a base declaration; merging is in declaration order.
fn merge_declarations(defs: Vec<EntityDef>) -> Result<BTreeMap<String, EntityDef>, Error> {
    let mut merged: BTreeMap<String, EntityDef> = BTreeMap::new();
    for def in defs {
        match merged.get_mut(&def.name) {
            None => {
                if def.extend {
                    return Err(Error::registry(format!(
                        "extension of '{}' has no base declaration",
                        def.name
                    )));
                }
                merged.insert(def.name.clone(), def);
            }
            Some(base) => {
                if !def.extend {
                    return Err(Error::registry(format!(
                        "entity '{}' is declared twice; use an extension",
                        def.name
                    )));
                }
                merge_into(base, def)?;
            }
        }
    }
    Ok(merged)
}

fn merge_into(base: &mut EntityDef, ext: EntityDef) -> Result<(), Error> {
    for field in ext.fields {
        match base.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => {
                if discriminant(&existing.kind) != discriminant(&field.kind) {
                    return Err(Error::registry(format!(
                        "field '{}' redeclared on '{}' with incompatible kind",
                        field.name, base.name
                    )));
                }
                *existing = field;
            }
            None => base.fields.push(field),
        }
    }
    if ext.order.is_some() {
        base.order = ext.order;
    }
    if ext.parent_field.is_some() {
        base.parent_field = ext.parent_field;
    }
    base.inherits.extend(ext.inherits);
    base.uniques.extend(ext.uniques);
    base.computes.extend(ext.computes);
    base.inverses.extend(ext.inverses);
    base.constrains.extend(ext.constrains);
    base.onchanges.extend(ext.onchanges);
    base.ondelete_hooks.extend(ext.ondelete_hooks);
    base.create_hooks.extend(ext.create_hooks);
    Ok(())
}

/// Topological order over delegated-inheritance edges, parents first.
fn delegation_order(merged: &BTreeMap<String, EntityDef>) -> Result<Vec<String>, Error> {
    let mut ordered = Vec::new();
    let mut done: BTreeSet<String> = BTreeSet::new();
    let mut on_path: BTreeSet<String> = BTreeSet::new();

    fn visit(
        name: &str,
        merged: &BTreeMap<String, EntityDef>,
        done: &mut BTreeSet<String>,
        on_path: &mut BTreeSet<String>,
        ordered: &mut Vec<String>,
    ) -> Result<(), Error> {
        if done.contains(name) {
            return Ok(());
        }
        if !on_path.insert(name.to_string()) {
            return Err(Error::registry(format!(
                "cycle in delegated inheritance involving '{name}'"
            )));
        }
        if let Some(def) = merged.get(name) {
            for (parent, _) in &def.inherits {
                if !merged.contains_key(parent) {
                    return Err(Error::registry(format!(
                        "'{name}' delegates to unknown entity '{parent}'"
                    )));
                }
                visit(parent, merged, done, on_path, ordered)?;
            }
        }
        on_path.remove(name);
        done.insert(name.to_string());
        ordered.push(name.to_string());
        Ok(())
    }

    for name in merged.keys() {
        visit(name, merged, &mut done, &mut on_path, &mut ordered)?;
    }
    Ok(ordered)
}

fn compile_model(
    def: &EntityDef,
    compiled_parents: &BTreeMap<String, Rc<Model>>,
) -> Result<Model, Error> {
    let mut fields: BTreeMap<String, Rc<Field>> = BTreeMap::new();
    let mut field_names: Vec<String> = Vec::new();

    let mut push_field = |fields: &mut BTreeMap<String, Rc<Field>>,
                          names: &mut Vec<String>,
                          field: Field| {
        if !fields.contains_key(&field.name) {
            names.push(field.name.clone());
        }
        fields.insert(field.name.clone(), Rc::new(field));
    };

    for fdef in &def.fields {
        push_field(
            &mut fields,
            &mut field_names,
            compile_field(&def.name, fdef),
        );
    }

    // Delegated inheritance: the parent's fields appear transparently on
    // the child as related aliases over the reference field.
    let mut inherits = BTreeMap::new();
    for (parent_name, via) in &def.inherits {
        inherits.insert(parent_name.clone(), via.clone());
        let parent = compiled_parents.get(parent_name).ok_or_else(|| {
            Error::registry(format!(
                "'{}' delegates to '{parent_name}' which is not compiled yet",
                def.name
            ))
        })?;

        let via_field = fields.get(via).cloned().ok_or_else(|| {
            Error::registry(format!(
                "'{}' delegates to '{parent_name}' via unknown field '{via}'",
                def.name
            ))
        })?;
        match &via_field.kind {
            FieldKind::Many2one { comodel } if comodel == parent_name => {}
            _ => {
                return Err(Error::registry(format!(
                    "delegation field '{via}' on '{}' must be a required many2one to '{parent_name}'",
                    def.name
                )));
            }
        }
        if !via_field.required {
            return Err(Error::registry(format!(
                "delegation field '{via}' on '{}' must be required",
                def.name
            )));
        }

        for parent_field in parent.fields() {
            if fields.contains_key(&parent_field.name) {
                continue;
            }
            push_field(
                &mut fields,
                &mut field_names,
                Field {
                    name: parent_field.name.clone(),
                    model: def.name.clone(),
                    kind: parent_field.kind.clone(),
                    storage: FieldStorage::Related {
                        path: format!("{via}.{}", parent_field.name),
                    },
                    inverse_hook: None,
                    required: false,
                    readonly: parent_field.readonly,
                    default: None,
                    selection: parent_field.selection.clone(),
                    expand: parent_field.expand.clone(),
                    ondelete: OnDelete::default(),
                    tracked: false,
                    translate: parent_field.translate,
                    index: false,
                    unique: false,
                    groups: parent_field.groups.clone(),
                },
            );
        }
    }

    let order = match &def.order {
        Some(spec) => parse_order(spec)?,
        None => Vec::new(),
    };

    Ok(Model {
        name: def.name.clone(),
        table: schema_info::table_name(&def.name),
        fields,
        field_names,
        order,
        parent_field: def
            .parent_field
            .clone()
            .unwrap_or_else(|| "parent_id".to_string()),
        inherits,
        uniques: def.uniques.clone(),
        computes: def.computes.clone(),
        inverses: def.inverses.clone(),
        constrains: def.constrains.clone(),
        onchanges: def.onchanges.clone(),
        ondelete_hooks: def.ondelete_hooks.clone(),
        create_hooks: def.create_hooks.clone(),
    })
}

fn compile_field(model: &str, def: &FieldDef) -> Field {
    Field {
        name: def.name.clone(),
        model: model.to_string(),
        kind: def.kind.clone(),
        storage: def.storage.clone(),
        inverse_hook: def.inverse.clone(),
        required: def.required,
        readonly: def.readonly,
        default: def.default.clone(),
        selection: def.selection.clone(),
        expand: def.expand.clone(),
        ondelete: def.ondelete,
        tracked: def.tracked,
        translate: def.translate,
        index: def.index,
        unique: def.unique,
        groups: def.groups.clone(),
    }
}

fn validate_models(models: &BTreeMap<String, Rc<Model>>) -> Result<(), Error> {
    for model in models.values() {
        for term in &model.order {
            if term.field != "id" && !model.has_field(&term.field) {
                return Err(Error::registry(format!(
                    "default order of '{}' references unknown field '{}'",
                    model.name, term.field
                )));
            }
        }
        for field in model.fields() {
            if let Some(comodel) = field.kind.comodel()
                && !models.contains_key(comodel)
            {
                return Err(Error::registry(format!(
                    "{}.{} references unknown entity '{comodel}'",
                    model.name, field.name
                )));
            }
            if let FieldKind::One2many { comodel, inverse } = &field.kind {
                let target = &models[comodel];
                let inv = target.field(inverse).map_err(|_| {
                    Error::registry(format!(
                        "{}.{}: inverse field '{inverse}' missing on '{comodel}'",
                        model.name, field.name
                    ))
                })?;
                match &inv.kind {
                    FieldKind::Many2one { comodel: back } if back == &model.name => {}
                    _ => {
                        return Err(Error::registry(format!(
                            "{}.{}: inverse '{comodel}.{inverse}' is not a many2one back to '{}'",
                            model.name, field.name, model.name
                        )));
                    }
                }
            }
            if let FieldKind::Monetary { currency_field } = &field.kind
                && !model.has_field(currency_field)
            {
                return Err(Error::registry(format!(
                    "{}.{}: currency field '{currency_field}' does not exist",
                    model.name, field.name
                )));
            }
            if let Some(hook) = field.compute_hook()
                && !model.computes.contains_key(hook)
            {
                return Err(Error::registry(format!(
                    "{}.{}: compute hook '{hook}' is not registered",
                    model.name, field.name
                )));
            }
            if let Some(hook) = &field.inverse_hook
                && !model.inverses.contains_key(hook)
            {
                return Err(Error::registry(format!(
                    "{}.{}: inverse hook '{hook}' is not registered",
                    model.name, field.name
                )));
            }
        }
        for constraint in &model.constrains {
            for fname in &constraint.fields {
                if !model.has_field(fname) {
                    return Err(Error::registry(format!(
                        "constraint on '{}' references unknown field '{fname}'",
                        model.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Recompute ordering: a stored compute ranks above every stored compute it
/// transitively depends on. Cycles contribute rank 0 at re-entry, keeping
/// the ranking finite.
fn compute_ranks(
    models: &BTreeMap<String, Rc<Model>>,
    graph: &DependencyGraph,
) -> BTreeMap<(String, String), u32> {
    // Reverse index: stored-computed target -> stored-computed sources.
    let mut deps: BTreeMap<(String, String), BTreeSet<(String, String)>> = BTreeMap::new();
    for model in models.values() {
        for field in model.fields() {
            for edge in graph.edges_from(&model.name, &field.name) {
                let target_model = &models[&edge.target.model];
                let Ok(target_field) = target_model.field(&edge.target.field) else {
                    continue;
                };
                if !target_field.is_stored_compute() {
                    continue;
                }
                let source_is_stored_compute = models
                    .get(&edge.source.model)
                    .and_then(|m| m.field(&edge.source.field).ok().cloned())
                    .is_some_and(|f| f.is_stored_compute());
                if source_is_stored_compute {
                    deps.entry((edge.target.model.clone(), edge.target.field.clone()))
                        .or_default()
                        .insert((edge.source.model.clone(), edge.source.field.clone()));
                }
            }
        }
    }

    fn rank_of(
        node: &(String, String),
        deps: &BTreeMap<(String, String), BTreeSet<(String, String)>>,
        memo: &mut BTreeMap<(String, String), u32>,
        on_path: &mut BTreeSet<(String, String)>,
    ) -> u32 {
        if let Some(r) = memo.get(node) {
            return *r;
        }
        if !on_path.insert(node.clone()) {
            return 0;
        }
        let r = deps
            .get(node)
            .map(|sources| {
                1 + sources
                    .iter()
                    .map(|s| rank_of(s, deps, memo, on_path))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        on_path.remove(node);
        memo.insert(node.clone(), r);
        r
    }

    let mut ranks = BTreeMap::new();
    for model in models.values() {
        for field in model.fields() {
            if field.is_stored_compute() {
                let node = (model.name.clone(), field.name.clone());
                let mut on_path = BTreeSet::new();
                let r = rank_of(&node, &deps, &mut ranks, &mut on_path);
                ranks.insert(node, r);
            }
        }
    }
    ranks
}

type RelationMaps = (
    BTreeMap<String, Vec<InboundRef>>,
    BTreeMap<(String, String), Vec<(String, String)>>,
);

fn relation_maps(models: &BTreeMap<String, Rc<Model>>) -> RelationMaps {
    let mut inbound: BTreeMap<String, Vec<InboundRef>> = BTreeMap::new();
    let mut o2m: BTreeMap<(String, String), Vec<(String, String)>> = BTreeMap::new();
    for model in models.values() {
        for field in model.fields() {
            // Related aliases do not own a column and never constrain
            // deletion.
            if field.related_path().is_some() {
                continue;
            }
            match &field.kind {
                FieldKind::Many2one { comodel } => {
                    inbound.entry(comodel.clone()).or_default().push(InboundRef {
                        model: model.name.clone(),
                        field: field.name.clone(),
                        ondelete: field.ondelete,
                        required: field.required,
                    });
                }
                FieldKind::One2many { comodel, inverse } => {
                    o2m.entry((comodel.clone(), inverse.clone()))
                        .or_default()
                        .push((model.name.clone(), field.name.clone()));
                }
                _ => {}
            }
        }
    }
    (inbound, o2m)
}
