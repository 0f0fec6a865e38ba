use crate::error::Error;

///
/// OrderTerm
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrderTerm {
    pub field: String,
    pub desc: bool,
}

/// Parse an order spec like `"date_order desc, id"`.
///
/// Ids are NOT appended here; search appends the id tiebreaker itself so
/// that explicitly ordered results stay deterministic.
pub fn parse_order(spec: &str) -> Result<Vec<OrderTerm>, Error> {
    let mut terms = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut words = part.split_whitespace();
        let field = words
            .next()
            .ok_or_else(|| Error::validation(format!("empty term in order spec '{spec}'")))?;
        let desc = match words.next() {
            None => false,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => false,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => true,
            Some(other) => {
                return Err(Error::validation(format!(
                    "invalid direction '{other}' in order spec '{spec}'"
                )));
            }
        };
        if words.next().is_some() {
            return Err(Error::validation(format!(
                "trailing tokens in order spec '{spec}'"
            )));
        }
        if !field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::validation(format!(
                "invalid field name '{field}' in order spec"
            )));
        }
        terms.push(OrderTerm {
            field: field.to_string(),
            desc,
        });
    }
    Ok(terms)
}
