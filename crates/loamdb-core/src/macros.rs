//! Declaration-side macros: value maps and domains in their list form.

/// Build a [`Vals`](crate::value::Vals) map from `key => value` pairs.
///
/// ```ignore
/// let vals = vals! { "name" => "Desk", "qty" => 3 };
/// ```
#[macro_export]
macro_rules! vals {
    () => { $crate::value::Vals::new() };
    ( $( $key:expr => $value:expr ),+ $(,)? ) => {{
        let mut map = $crate::value::Vals::new();
        $( map.insert($key.to_string(), $crate::value::Value::from($value)); )+
        map
    }};
}

/// Build a [`Domain`](crate::db::query::Domain) in list form: string
/// prefix operators and `(path, operator, value)` leaves.
///
/// ```ignore
/// let d = domain![ "|", ("state", "=", "draft"), ("total", ">", 100.0) ];
/// ```
#[macro_export]
macro_rules! domain {
    () => { $crate::db::query::Domain::new() };
    ( $( $item:tt ),+ $(,)? ) => {
        $crate::db::query::Domain::from_items(vec![ $( $crate::__domain_item!($item) ),+ ])
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __domain_item {
    ( ( $path:expr, $op:expr, $value:expr ) ) => {
        $crate::db::query::DomainItem::leaf($path, $op, $crate::value::Value::from($value))
    };
    ( $prefix:expr ) => {
        $crate::db::query::DomainItem::prefix($prefix)
    };
}
