use crate::{
    config::Granularity,
    db::{
        env::Env,
        fields,
        ops::search,
        query::{Domain, DomainItem},
        recordset::RecordSet,
    },
    error::Error,
    obs::sink::{self, ExecKind, MetricsEvent},
    registry::{Field, Model},
    value::{FieldKind, Value, command::Vals},
};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use std::rc::Rc;

///
/// Group
///
/// One result bucket: key values per groupby spec, aggregate values per
/// aggregate spec, the record count, and a domain that re-queries exactly
/// this bucket.
///

#[derive(Clone, Debug)]
pub struct Group {
    pub keys: Vals,
    pub aggregates: Vals,
    pub count: usize,
    pub domain: Domain,
}

impl Group {
    #[must_use]
    pub fn key(&self, spec: &str) -> Value {
        self.keys.get(spec).cloned().unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn aggregate(&self, spec: &str) -> Value {
        self.aggregates.get(spec).cloned().unwrap_or(Value::Null)
    }
}

///
/// AggOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AggOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    ArrayAgg,
    CountDistinct,
    BoolAnd,
    BoolOr,
}

impl AggOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            "array_agg" => Some(Self::ArrayAgg),
            "count_distinct" => Some(Self::CountDistinct),
            "bool_and" => Some(Self::BoolAnd),
            "bool_or" => Some(Self::BoolOr),
            _ => None,
        }
    }

    fn compatible(self, kind: &FieldKind) -> bool {
        match self {
            Self::Sum | Self::Avg => kind.is_numeric(),
            Self::Min | Self::Max => {
                kind.is_numeric()
                    || matches!(
                        kind,
                        FieldKind::Date
                            | FieldKind::Datetime
                            | FieldKind::Char { .. }
                            | FieldKind::Text
                    )
            }
            Self::BoolAnd | Self::BoolOr => matches!(kind, FieldKind::Boolean),
            Self::Count | Self::CountDistinct | Self::ArrayAgg => !kind.is_x2many(),
        }
    }
}

struct AggSpec {
    spec: String,
    field: Rc<Field>,
    op: AggOp,
}

struct GroupBySpec {
    spec: String,
    field: Rc<Field>,
    granularity: Option<Granularity>,
}

/// Aggregate matching records into buckets per the groupby specs.
pub fn read_group(
    handle: &RecordSet,
    domain: &Domain,
    aggregates: &[&str],
    groupby: &[&str],
    limit: Option<usize>,
    offset: usize,
) -> Result<Vec<Group>, Error> {
    let env = handle.env().clone();
    let model = handle.model().clone();
    sink::emit(MetricsEvent::ExecStart {
        kind: ExecKind::ReadGroup,
        entity: model.name.clone(),
    });

    let agg_specs = parse_aggregates(&model, aggregates)?;
    let group_specs = parse_groupby(&env, &model, groupby)?;

    let matched = search::matching_ids(handle, domain)?;
    let records = handle.browse(&matched);

    // Bucket assignment per record.
    let mut buckets: Vec<(Vec<BucketKey>, Vec<i64>)> = Vec::new();
    for one in records.iter() {
        let mut key = Vec::with_capacity(group_specs.len());
        for spec in &group_specs {
            key.push(bucket_key(&env, &one, spec)?);
        }
        match buckets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, ids)) => ids.extend(one.ids()),
            None => buckets.push((key, one.ids())),
        }
    }

    // Selection expansion: declared options contribute empty buckets, in
    // declared order, for a single-level group-by.
    if let [spec] = &group_specs[..]
        && matches!(spec.field.kind, FieldKind::Selection)
        && (spec.field.expand.is_some() || !spec.field.selection.is_empty())
    {
        let mut keys: Vec<String> = spec.field.selection.iter().map(|(k, _)| k.clone()).collect();
        if let Some(expand) = &spec.field.expand {
            for (k, _) in expand(&env) {
                if !keys.contains(&k) {
                    keys.push(k);
                }
            }
        }
        for key in keys {
            let bucket = vec![BucketKey::selection(&spec.field, &key)];
            if !buckets.iter().any(|(k, _)| *k == bucket) {
                buckets.push((bucket, Vec::new()));
            }
        }
    }

    sort_buckets(&mut buckets);

    let mut out = Vec::new();
    for (key, ids) in buckets.into_iter().skip(offset).take(limit.unwrap_or(usize::MAX)) {
        let members = handle.browse(&ids);
        let mut keys = Vals::new();
        let mut bucket_domain = domain.clone();
        for (part, spec) in key.iter().zip(&group_specs) {
            keys.insert(spec.spec.clone(), part.value.clone());
            bucket_domain = bucket_domain.and(part.domain.clone());
        }

        let mut aggs = Vals::new();
        for agg in &agg_specs {
            aggs.insert(agg.spec.clone(), aggregate(&members, agg)?);
        }

        out.push(Group {
            keys,
            aggregates: aggs,
            count: ids.len(),
            domain: bucket_domain,
        });
    }

    sink::emit(MetricsEvent::ExecFinish {
        kind: ExecKind::ReadGroup,
        entity: model.name.clone(),
        records: out.len() as u64,
    });
    Ok(out)
}

fn parse_aggregates(model: &Rc<Model>, specs: &[&str]) -> Result<Vec<AggSpec>, Error> {
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let (field_name, op_name) = spec.split_once(':').ok_or_else(|| {
            Error::validation(format!("invalid aggregate spec '{spec}', expected field:op"))
        })?;
        let op = AggOp::parse(op_name)
            .ok_or_else(|| Error::validation(format!("unknown aggregate '{op_name}'")))?;
        let field = model.field(field_name)?.clone();
        if !op.compatible(&field.kind) {
            return Err(Error::validation(format!(
                "aggregate '{op_name}' is not compatible with field '{field_name}'"
            )));
        }
        out.push(AggSpec {
            spec: (*spec).to_string(),
            field,
            op,
        });
    }
    Ok(out)
}

fn parse_groupby(env: &Env, model: &Rc<Model>, specs: &[&str]) -> Result<Vec<GroupBySpec>, Error> {
    if specs.is_empty() {
        return Err(Error::validation("read_group needs at least one groupby"));
    }
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let (field_name, suffix) = match spec.split_once(':') {
            Some((f, s)) => (f, Some(s)),
            None => (*spec, None),
        };
        let field = model.field(field_name)?.clone();
        if field.kind.is_x2many() {
            return Err(Error::validation(format!(
                "cannot group by collection field '{field_name}'"
            )));
        }
        let is_date = matches!(field.kind, FieldKind::Date | FieldKind::Datetime);
        let granularity = match suffix {
            Some(s) => {
                if !is_date {
                    return Err(Error::validation(format!(
                        "granularity on non-date field '{field_name}'"
                    )));
                }
                Some(Granularity::parse(s).ok_or_else(|| {
                    Error::validation(format!("unknown granularity '{s}' in '{spec}'"))
                })?)
            }
            None if is_date => Some(env.config().read_group_default_granularity),
            None => None,
        };
        out.push(GroupBySpec {
            spec: (*spec).to_string(),
            field,
            granularity,
        });
    }
    Ok(out)
}

///
/// BucketKey
///
/// One group-by component of a bucket: the exposed value, a sort rank, and
/// the domain fragment that re-selects the bucket.
///

#[derive(Clone, Debug)]
struct BucketKey {
    value: Value,
    /// `(falsy-last, declared selection position)`; ties break on
    /// `sort_value` comparison. See `sort_buckets`.
    rank: (u8, u32),
    sort_value: Value,
    domain: Domain,
}

impl PartialEq for BucketKey {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl BucketKey {
    fn selection(field: &Rc<Field>, key: &str) -> Self {
        let position = field
            .selection
            .iter()
            .position(|(k, _)| k == key)
            .map_or(u32::MAX - 1, |p| p as u32);
        Self {
            value: Value::Str(key.to_string()),
            rank: (0, position),
            sort_value: Value::Str(key.to_string()),
            domain: Domain::leaf(field.name.clone(), "=", key),
        }
    }

    fn empty(field_name: &str) -> Self {
        Self {
            value: Value::Bool(false),
            rank: (1, u32::MAX),
            sort_value: Value::Null,
            domain: Domain::leaf(field_name, "=", false),
        }
    }
}

fn bucket_key(env: &Env, one: &RecordSet, spec: &GroupBySpec) -> Result<BucketKey, Error> {
    let value = fields::get(one, &spec.field.name)?;
    if value.is_falsy() {
        return Ok(BucketKey::empty(&spec.field.name));
    }

    if let Some(granularity) = spec.granularity {
        return date_bucket(env, spec, &value, granularity);
    }

    Ok(match &spec.field.kind {
        FieldKind::Selection => BucketKey::selection(&spec.field, value.as_str().unwrap_or_default()),
        _ => BucketKey {
            rank: (0, 0),
            sort_value: value.clone(),
            domain: Domain::leaf(spec.field.name.clone(), "=", value.clone()),
            value,
        },
    })
}

fn date_bucket(
    env: &Env,
    spec: &GroupBySpec,
    value: &Value,
    granularity: Granularity,
) -> Result<BucketKey, Error> {
    let offset = env.tz();
    let is_datetime = matches!(spec.field.kind, FieldKind::Datetime);

    // Datetimes shift into the active timezone before truncation; dates
    // are timezone-less.
    let local: NaiveDateTime = match value {
        Value::DateTime(dt) => *dt + Duration::seconds(i64::from(offset.local_minus_utc())),
        Value::Date(d) => d.and_hms_opt(0, 0, 0).unwrap_or_default(),
        other => {
            return Err(Error::validation(format!(
                "cannot bucket non-date value {other:?} on '{}'",
                spec.field.name
            )));
        }
    };

    let day = local.date();
    let (start, end, label) = match granularity {
        Granularity::Day => (day, day + Duration::days(1), day.format("%Y-%m-%d").to_string()),
        Granularity::Week => {
            let start = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
            let iso = start.iso_week();
            (
                start,
                start + Duration::days(7),
                format!("{}-W{:02}", iso.year(), iso.week()),
            )
        }
        Granularity::Month => {
            let start = NaiveDate::from_ymd_opt(day.year(), day.month(), 1).unwrap_or(day);
            (start, next_month(start), start.format("%Y-%m").to_string())
        }
        Granularity::Quarter => {
            let month = (day.month0() / 3) * 3 + 1;
            let start = NaiveDate::from_ymd_opt(day.year(), month, 1).unwrap_or(day);
            let end = next_month(next_month(next_month(start)));
            (start, end, format!("{}-Q{}", day.year(), day.month0() / 3 + 1))
        }
        Granularity::Year => {
            let start = NaiveDate::from_ymd_opt(day.year(), 1, 1).unwrap_or(day);
            let end = NaiveDate::from_ymd_opt(day.year() + 1, 1, 1).unwrap_or(day);
            (start, end, day.format("%Y").to_string())
        }
    };

    // Bucket bounds go back to storage form: UTC naive for datetimes.
    let (lo, hi) = if is_datetime {
        let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
        (
            Value::DateTime(start.and_hms_opt(0, 0, 0).unwrap_or_default() - shift),
            Value::DateTime(end.and_hms_opt(0, 0, 0).unwrap_or_default() - shift),
        )
    } else {
        (Value::Date(start), Value::Date(end))
    };

    let domain = Domain::from_items(vec![
        DomainItem::And,
        DomainItem::leaf(spec.field.name.clone(), ">=", lo),
        DomainItem::leaf(spec.field.name.clone(), "<", hi),
    ]);

    Ok(BucketKey {
        value: Value::Str(label),
        rank: (0, 0),
        sort_value: Value::Date(start),
        domain,
    })
}

fn next_month(start: NaiveDate) -> NaiveDate {
    let (year, month) = if start.month() == 12 {
        (start.year() + 1, 1)
    } else {
        (start.year(), start.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(start)
}

/// Buckets order lexicographically per component: declared selection order
/// first, then comparable values ascending, the `False` bucket always last.
fn sort_buckets(buckets: &mut [(Vec<BucketKey>, Vec<i64>)]) {
    buckets.sort_by(|(a, _), (b, _)| {
        for (x, y) in a.iter().zip(b.iter()) {
            let ord = x
                .rank
                .cmp(&y.rank)
                .then_with(|| x.sort_value.compare(&y.sort_value).unwrap_or(std::cmp::Ordering::Equal));
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn aggregate(members: &RecordSet, agg: &AggSpec) -> Result<Value, Error> {
    let mut values: Vec<Value> = Vec::with_capacity(members.len());
    for one in members.iter() {
        values.push(fields::get(&one, &agg.field.name)?);
    }

    Ok(match agg.op {
        AggOp::Count => Value::Int(values.iter().filter(|v| !v.is_null()).count() as i64),
        AggOp::CountDistinct => {
            let mut seen: Vec<String> = Vec::new();
            for v in values.iter().filter(|v| !v.is_null()) {
                let token = v.display();
                if !seen.contains(&token) {
                    seen.push(token);
                }
            }
            Value::Int(seen.len() as i64)
        }
        AggOp::ArrayAgg => Value::List(values),
        AggOp::Sum => {
            if matches!(agg.field.kind, FieldKind::Integer) {
                Value::Int(values.iter().filter_map(Value::as_i64).sum())
            } else {
                Value::Float(values.iter().filter_map(Value::as_f64).sum())
            }
        }
        AggOp::Avg => {
            let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggOp::Min | AggOp::Max => {
            let mut best: Option<Value> = None;
            for v in values.into_iter().filter(|v| !v.is_null()) {
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        let keep_new = match v.compare(&b) {
                            Some(std::cmp::Ordering::Less) => agg.op == AggOp::Min,
                            Some(std::cmp::Ordering::Greater) => agg.op == AggOp::Max,
                            _ => false,
                        };
                        if keep_new { v } else { b }
                    }
                });
            }
            best.unwrap_or(Value::Null)
        }
        AggOp::BoolAnd | AggOp::BoolOr => {
            let bools: Vec<bool> = values.iter().filter_map(Value::as_bool).collect();
            if bools.is_empty() {
                Value::Null
            } else if agg.op == AggOp::BoolAnd {
                Value::Bool(bools.iter().all(|b| *b))
            } else {
                Value::Bool(bools.iter().any(|b| *b))
            }
        }
    })
}
