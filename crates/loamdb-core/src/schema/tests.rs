use crate::{
    schema::{EntityDef, FieldDef, FieldStorage, OnDelete},
    value::FieldKind,
};

#[test]
fn field_builder_sets_kind_options() {
    let field = FieldDef::char("name").size(64).required().index().tracked();
    assert_eq!(field.kind, FieldKind::Char { size: Some(64) });
    assert!(field.required && field.index && field.tracked);
}

#[test]
fn compute_then_stored_persists_the_result() {
    let field = FieldDef::float("total")
        .compute("compute_total", &["line_ids.price_subtotal"])
        .stored();
    match &field.storage {
        FieldStorage::Computed {
            compute,
            store,
            depends,
        } => {
            assert_eq!(compute, "compute_total");
            assert!(store);
            assert_eq!(depends, &["line_ids.price_subtotal".to_string()]);
        }
        other => panic!("expected computed storage, got {other:?}"),
    }
}

#[test]
fn related_replaces_storage() {
    let field = FieldDef::char("partner_name").related("partner_id.name");
    assert_eq!(
        field.storage,
        FieldStorage::Related {
            path: "partner_id.name".to_string()
        }
    );
}

#[test]
fn selection_options_keep_declared_order() {
    let field = FieldDef::selection("state", [("draft", "Draft"), ("sent", "Sent"), ("done", "Done")]);
    let keys: Vec<&str> = field.selection.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["draft", "sent", "done"]);
}

#[test]
fn entity_builder_collects_hooks_and_delegation() {
    let def = EntityDef::new("res.users")
        .inherits("res.partner", "partner_id")
        .field(
            FieldDef::many2one("partner_id", "res.partner")
                .required()
                .ondelete(OnDelete::Restrict),
        )
        .compute_fn("compute_display", |_| Ok(()))
        .constrains(&["login"], |_| Ok(()));
    assert_eq!(def.inherits, vec![("res.partner".to_string(), "partner_id".to_string())]);
    assert!(def.computes.contains_key("compute_display"));
    assert_eq!(def.constrains.len(), 1);
    assert!(!def.extend);
    assert!(EntityDef::extend("res.users").extend);
}
