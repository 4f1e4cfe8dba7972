use qubus::binder::{Binder, Dialect, Param, Params, count_placeholders};
use qubus::database::Database;
use qubus::error::QubusError;
use qubus::materialize::{Output, OutputShape};
use rusqlite::types::Value;

fn sqlite() -> Binder {
    Binder::new(Dialect::Sqlite)
}

#[test]
fn positional_placeholders_become_numbered_bind_variables() {
    let bound = sqlite()
        .bind(Some("select * from t where a = ? and b = ?"), vec![Param::from(1), Param::from("x")])
        .unwrap()
        .unwrap();
    assert_eq!(bound.native, "select * from t where a = ?1 and b = ?2");
    assert_eq!(bound.values, vec![Value::Integer(1), Value::Text("x".into())]);
    assert_eq!(bound.inlined, "select * from t where a = 1 and b = 'x'");
}

#[test]
fn missing_template_binds_to_nothing() {
    assert!(sqlite().bind(None, vec![Param::from(1)]).unwrap().is_none());
}

#[test]
fn template_without_placeholder_is_rejected() {
    let err = sqlite().bind(Some("select 1"), Vec::<Param>::new()).unwrap_err();
    assert!(matches!(err, QubusError::InvalidQuery(_)));
    assert!(err.to_string().contains("must have a placeholder"));
}

#[test]
fn parameter_count_must_match_placeholders() {
    let template = Some("insert into t values (?, ?, ?)");
    for supplied in [1usize, 2, 4] {
        let params: Vec<Param> = (0..supplied as i64).map(Param::from).collect();
        match sqlite().bind(template, params).unwrap_err() {
            QubusError::PlaceholderCountMismatch { expected, supplied: got } => {
                assert_eq!(expected, 3);
                assert_eq!(got, supplied);
            }
            other => panic!("unexpected error {other}"),
        }
    }
    let params: Vec<Param> = (0..3).map(Param::from).collect();
    assert!(sqlite().bind(template, params).is_ok());
}

#[test]
fn embedded_quote_is_escaped_per_dialect() {
    let template = Some("select * from t where name = ?");
    let mysql = Binder::new(Dialect::Mysql).inline(template, vec![Param::from("O'Brien")]).unwrap();
    assert_eq!(mysql.as_deref(), Some(r"select * from t where name = 'O\'Brien'"));
    let bound = sqlite().bind(template, vec![Param::from("O'Brien")]).unwrap().unwrap();
    assert_eq!(bound.inlined, "select * from t where name = 'O''Brien'");
    // the native statement never carries the value
    assert_eq!(bound.native, "select * from t where name = ?1");
}

#[test]
fn escaped_quote_does_not_end_a_literal() {
    let template = r"select * from t where note = 'don\'t ? :skip' and id = ?";
    assert_eq!(count_placeholders(template).unwrap(), 1);
    let bound = sqlite().bind(Some(template), vec![Param::from(7)]).unwrap().unwrap();
    assert_eq!(bound.inlined, "select * from t where note = 'don''t ? :skip' and id = 7");
    assert_eq!(bound.native, "select * from t where note = 'don''t ? :skip' and id = ?1");
    let mysql = Binder::new(Dialect::Mysql).inline(Some(template), vec![Param::from(7)]).unwrap().unwrap();
    assert_eq!(mysql, r"select * from t where note = 'don\'t ? :skip' and id = 7");
}

#[test]
fn backslash_escaped_literal_runs_on_sqlite() {
    let mut db = Database::open_in_memory("qub_").unwrap();
    let query = db.prepare(Some(r"select 'it\'s', ?"), vec![Param::from(1)]).unwrap();
    let rows = db.get_results(query.as_ref(), OutputShape::ArrayN).unwrap();
    assert_eq!(rows, Some(Output::Numeric(vec![vec![Value::Text("it's".into()), Value::Integer(1)]])));
}

#[test]
fn quoted_identifiers_hide_placeholders() {
    let template = r#"select "odd?name", ":label" from t where id = ?"#;
    assert_eq!(count_placeholders(template).unwrap(), 1);
    let bound = sqlite().bind(Some(template), vec![Param::from(4)]).unwrap().unwrap();
    assert_eq!(bound.native, r#"select "odd?name", ":label" from t where id = ?1"#);
    assert!(matches!(count_placeholders(r#"select "open from t"#), Err(QubusError::InvalidQuery(_))));
}

#[test]
fn doubled_quotes_in_literals_survive() {
    let template = "select * from t where a = 'it''s' and b = ?";
    let bound = sqlite().bind(Some(template), vec![Param::from(2)]).unwrap().unwrap();
    assert_eq!(bound.native, "select * from t where a = 'it''s' and b = ?1");
}

#[test]
fn unterminated_literal_is_invalid() {
    let err = sqlite().bind(Some("select * from t where a = 'open and b = ?"), vec![Param::from(1)]).unwrap_err();
    assert!(matches!(err, QubusError::InvalidQuery(_)));
}

#[test]
fn composite_parameters_are_rejected() {
    let template = Some("select * from t where a = ? and b = ?");
    let err = sqlite()
        .bind(template, vec![Param::from(1), Param::List(vec![Param::from(2)])])
        .unwrap_err();
    assert!(matches!(err, QubusError::UnsupportedParameterType("array")));
    let err = sqlite()
        .bind(template, vec![Param::from(1), Param::Map(vec![("k".into(), Param::from(2))])])
        .unwrap_err();
    assert!(matches!(err, QubusError::UnsupportedParameterType("object")));
}

#[test]
fn empty_list_binds_as_null() {
    let bound = sqlite()
        .bind(Some("select * from t where a = ? and b = ?"), vec![Param::from(1), Param::List(vec![])])
        .unwrap()
        .unwrap();
    assert_eq!(bound.inlined, "select * from t where a = 1 and b = NULL");
    assert_eq!(bound.values[1], Value::Null);
}

#[test]
fn array_wrapped_list_matches_flat_list() {
    let template = Some("select * from t where a = ? and b = ?");
    let flat = sqlite().bind(template, vec![Param::from(1), Param::from("b")]).unwrap();
    let wrapped = sqlite()
        .bind(template, vec![Param::List(vec![Param::from(1), Param::from("b")])])
        .unwrap();
    assert_eq!(flat, wrapped);
}

#[test]
fn scalars_render_as_sql_literals() {
    let bound = sqlite()
        .bind(Some("values (?, ?, ?, ?)"), vec![Param::Null, Param::from(true), Param::from(1.5), Param::from(None::<i64>)])
        .unwrap()
        .unwrap();
    assert_eq!(bound.inlined, "values (NULL, 1, 1.5, NULL)");
    assert_eq!(bound.values, vec![Value::Null, Value::Integer(1), Value::Real(1.5), Value::Null]);
}

#[test]
fn repeated_named_placeholder_counts_once() {
    let template = "select * from t where a = :id or b = :id and c = ?";
    assert_eq!(count_placeholders(template).unwrap(), 2);
    let bound = sqlite().bind(Some(template), vec![Param::from(3), Param::from("x")]).unwrap().unwrap();
    assert_eq!(bound.native, "select * from t where a = ?1 or b = ?1 and c = ?2");
    assert_eq!(bound.inlined, "select * from t where a = 3 or b = 3 and c = 'x'");
}

#[test]
fn named_parameters_are_looked_up_by_name() {
    let template = Some("select * from t where c = :name and a = :id or b = :id");
    let params = Params::named(vec![("id", Param::from(3)), ("name", Param::from("x"))]);
    let bound = sqlite().bind(template, params).unwrap().unwrap();
    assert_eq!(bound.native, "select * from t where c = ?1 and a = ?2 or b = ?2");
    assert_eq!(bound.values, vec![Value::Text("x".into()), Value::Integer(3)]);

    let missing = Params::named(vec![("id", Param::from(3)), ("other", Param::from("x"))]);
    assert!(matches!(sqlite().bind(template, missing), Err(QubusError::InvalidQuery(_))));
}

#[test]
fn casts_and_literals_are_not_placeholders() {
    assert_eq!(count_placeholders("select a::text, ':x', '?' from t where b = ?").unwrap(), 1);
    assert_eq!(count_placeholders("select '?'").unwrap(), 0);
}
