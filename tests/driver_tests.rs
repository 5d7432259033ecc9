use std::fs;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use pathql::driver::{register_global_type, DriverOptions};
use pathql::{Connection, Driver, DriverError, RecordSchema, Schema};
use serde_json::{json, Value};
use tempfile::tempdir;

fn testdata() -> Connection {
    let dsn = format!("file://{}/tests/testdata/", env!("CARGO_MANIFEST_DIR"));
    Driver::open(&dsn).unwrap()
}

fn collect(conn: &Connection, sql: &str, args: &[Value]) -> Vec<Vec<Value>> {
    conn.query(sql, args)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn test_select_all_with_registered_type() {
    let conn = testdata();
    conn.exec("REGISTER TYPE Foo AS struct{Id int; Name string}", &[])
        .unwrap();

    let rows = collect(&conn, "SELECT * FROM Foo", &[]);
    assert_eq!(
        rows,
        vec![
            vec![json!(1), json!("name1")],
            vec![json!(2), json!("name2")],
            vec![json!(3), json!("name3")],
        ]
    );
}

#[test]
fn test_select_by_id_and_in_placeholders() {
    let conn = testdata();
    conn.exec("REGISTER TYPE Foo AS struct{Id int; Name string}", &[])
        .unwrap();

    let rows = collect(&conn, "SELECT id, name FROM Foo WHERE id = 2", &[]);
    assert_eq!(rows, vec![vec![json!(2), json!("name2")]]);

    let rows = collect(
        &conn,
        "SELECT id, name FROM Foo WHERE id IN(?, ?)",
        &[json!(1), json!(3)],
    );
    assert_eq!(
        rows,
        vec![vec![json!(1), json!("name1")], vec![json!(3), json!("name3")]]
    );

    // Same statement, different arguments
    let stmt = conn.prepare("SELECT name FROM Foo WHERE id IN(?)").unwrap();
    assert_eq!(stmt.num_input(), 1);
    let first: Vec<_> = stmt.query(&[json!(2)]).unwrap().map(Result::unwrap).collect();
    let second: Vec<_> = stmt.query(&[json!(1)]).unwrap().map(Result::unwrap).collect();
    assert_eq!(first, vec![vec![json!("name2")]]);
    assert_eq!(second, vec![vec![json!("name1")]]);
}

#[test]
fn test_register_type_from_sample() {
    let conn = testdata();
    conn.exec("REGISTER TYPE Foo AS ?", &[json!({"id": 0, "name": ""})])
        .unwrap();

    let record = conn.lookup_type("Foo").unwrap();
    assert_eq!(record.len(), 2);

    let rows = collect(&conn, "SELECT name FROM Foo WHERE id > 1 LIMIT 1", &[]);
    assert_eq!(rows, vec![vec![json!("name2")]]);
}

#[test]
fn test_register_global_type() {
    let conn = testdata();
    conn.exec(
        "REGISTER GLOBAL TYPE GlobalFoo AS struct{Id int; Name string}",
        &[],
    )
    .unwrap();

    let other = testdata();
    other.prepare("SELECT 1 AS One FROM single").unwrap();
    assert!(other.lookup_type("GlobalFoo").is_some());

    register_global_type(
        "GlobalBaz",
        RecordSchema::new("GlobalBaz").with_field("Id", Schema::INT),
    );
    other.prepare("SELECT 1 AS One FROM single").unwrap();
    assert!(other.lookup_type("globalbaz").is_some());
}

#[test]
fn test_single_table_with_sub_select() {
    let conn = testdata();
    let stmt = conn
        .prepare(
            "SELECT ID, NAME, VALUE, TS FROM (SELECT 1 AS ID, CAST(? AS CHAR) AS NAME, CAST(? AS int) AS VALUE, NOW() TS FROM single LIMIT 1)",
        )
        .unwrap();
    assert_eq!(stmt.num_input(), 2);

    let rows = stmt.query(&[json!("name1"), json!(10)]).unwrap();
    assert_eq!(rows.columns(), vec!["ID", "NAME", "VALUE", "TS"]);
    let types: Vec<_> = rows
        .column_types()
        .into_iter()
        .map(|column| column.database_type)
        .collect();
    assert_eq!(types, vec!["INT", "STRING", "INT", "TIME"]);

    let rows: Vec<_> = rows.collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], json!(1));
    assert_eq!(rows[0][1], json!("name1"));
    assert_eq!(rows[0][2], json!(10));
    assert!(rows[0][3].is_string());
}

#[test]
fn test_constant_false_skips_missing_file() {
    let conn = testdata();
    conn.exec("REGISTER TYPE Missing AS struct{Id int}", &[])
        .unwrap();

    let rows = collect(&conn, "SELECT id FROM Missing WHERE 1 = 0", &[]);
    assert!(rows.is_empty());

    let err = conn.query("SELECT id FROM Missing", &[]).unwrap_err();
    assert!(matches!(err, DriverError::Resource(_)));
    assert!(err.to_string().contains("invalid source"));
}

#[test]
fn test_gzip_and_yaml_tables() {
    let dir = tempdir().unwrap();
    let file = fs::File::create(dir.path().join("Events.json.gz")).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    writeln!(encoder, r#"{{"id": 1, "kind": "open"}}"#).unwrap();
    writeln!(encoder, r#"{{"id": 2, "kind": "close"}}"#).unwrap();
    encoder.finish().unwrap();
    fs::write(
        dir.path().join("Users.yaml"),
        "{id: 7, name: alice}\n{id: 8, name: bob}\n",
    )
    .unwrap();

    let conn = Driver::open(&dir.path().display().to_string()).unwrap();
    conn.exec("REGISTER TYPE Events AS struct{Id int; Kind string}", &[])
        .unwrap();
    conn.exec("REGISTER TYPE Users AS struct{Id int; Name string}", &[])
        .unwrap();

    let rows = collect(&conn, "SELECT kind FROM Events WHERE id = ?", &[json!(2)]);
    assert_eq!(rows, vec![vec![json!("close")]]);

    let rows = collect(&conn, "SELECT name FROM Users WHERE name <> 'alice'", &[]);
    assert_eq!(rows, vec![vec![json!("bob")]]);
}

#[test]
fn test_line_limit_and_decode_errors() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("Wide.json"),
        format!("{{\"name\": \"{}\"}}\n", "x".repeat(256)),
    )
    .unwrap();
    fs::write(dir.path().join("Bad.json"), "{\"id\": \"one\"}\n").unwrap();

    let options = DriverOptions {
        max_line_bytes: 64,
        ..DriverOptions::default()
    };
    let conn = Driver::open_with(&dir.path().display().to_string(), options).unwrap();
    conn.exec("REGISTER TYPE Wide AS struct{Name string}", &[])
        .unwrap();
    conn.exec("REGISTER TYPE Bad AS struct{Id int}", &[]).unwrap();

    let mut rows = conn.query("SELECT name FROM Wide", &[]).unwrap();
    let err = rows.next().unwrap().unwrap_err();
    assert!(err.to_string().contains("exceeds 64 bytes"));
    assert!(rows.next().is_none());

    let mut rows = conn.query("SELECT id FROM Bad", &[]).unwrap();
    let err = rows.next().unwrap().unwrap_err();
    assert!(matches!(err, DriverError::Decode { line: 1, .. }));
}

#[test]
fn test_statement_errors() {
    let conn = testdata();

    let err = conn.prepare("DELETE FROM Foo").unwrap_err();
    assert!(matches!(err, DriverError::UnsupportedStatement(_)));

    let err = conn.query("SELECT * FROM Unregistered", &[]).unwrap_err();
    assert!(matches!(err, DriverError::TypeNotFound(_)));

    conn.exec("REGISTER TYPE Foo AS struct{Id int; Name string}", &[])
        .unwrap();
    let err = conn.query("SELECT bogus FROM Foo", &[]).unwrap_err();
    assert!(err.to_string().contains("unable to match column: bogus"));

    let err = conn
        .query("SELECT id FROM Foo WHERE id IN(?, ?)", &[json!(1)])
        .unwrap_err();
    assert!(matches!(err, DriverError::Query(_)));

    let err = conn
        .prepare("SELECT id FROM Foo")
        .unwrap()
        .exec(&[])
        .unwrap_err();
    assert!(matches!(err, DriverError::UnsupportedStatement(_)));
}

#[test]
fn test_invalid_dsn() {
    assert!(matches!(
        Driver::open("http://localhost/data").unwrap_err(),
        DriverError::InvalidDsn(_)
    ));
    let err = Driver::open("file:///tmp/data?cache=true").unwrap_err();
    assert!(err.to_string().contains("unsupported options: [cache]"));
}
