use qubus::binder::{Bound, Param};
use qubus::database::Database;
use qubus::error::QubusError;
use rusqlite::types::Value;

fn seeded() -> Database {
    let mut db = Database::open_in_memory("qub_").unwrap();
    db.tenant.set_site_id(1);
    db.connection()
        .execute_batch("create table qub_option (option_key text primary key, option_value text)")
        .unwrap();
    db
}

fn count(db: &mut Database) -> Option<Value> {
    db.get_var(Some(&Bound::raw("select count(*) from qub_option")), 0, 0).unwrap()
}

fn insert(db: &mut Database, key: &str) -> qubus::Result<usize> {
    let table = db.table("option")?;
    let template = format!("insert into {table} (option_key, option_value) values (?, ?)");
    let statement = db.prepare(Some(&template), vec![Param::from(key), Param::from("v")])?;
    match statement {
        Some(statement) => db.query(&statement),
        None => Ok(0),
    }
}

#[test]
fn unit_of_work_is_committed() {
    let mut db = seeded();
    let inserted = db.transaction(|db| Ok(insert(db, "a")? + insert(db, "b")?)).unwrap();
    assert_eq!(inserted, Some(2));
    assert_eq!(count(&mut db), Some(Value::Integer(2)));
}

#[test]
fn failure_rolls_back_and_propagates() {
    let mut db = seeded();
    let err = db
        .transaction_or(|db| {
            insert(db, "a")?;
            insert(db, "a")
        }, 0)
        .unwrap_err();
    assert!(matches!(err, QubusError::Driver(_)));
    assert_eq!(count(&mut db), Some(Value::Integer(0)));
}

#[test]
fn failure_returns_default_when_not_throwing() {
    let mut db = seeded();
    db.throw_transaction_exceptions = false;
    let result = db.transaction_or(|db| {
        insert(db, "a")?;
        Err(QubusError::Execution("boom".into()))
    }, 42usize);
    assert_eq!(result.unwrap(), 42);
    assert_eq!(count(&mut db), Some(Value::Integer(0)));
    // the connection is usable again afterwards
    assert_eq!(db.transaction(|db| insert(db, "b")).unwrap(), Some(1));
}

#[test]
fn nested_transaction_fails_fast() {
    let mut db = seeded();
    db.throw_transaction_exceptions = false;
    let err = db
        .transaction_or(|db| {
            insert(db, "a")?;
            db.transaction(|db| insert(db, "b")).map(|_| 0)
        }, 0)
        .unwrap_err();
    assert!(matches!(err, QubusError::NestedTransaction));
    assert_eq!(count(&mut db), Some(Value::Integer(0)));
}
