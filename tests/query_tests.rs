mod common;

use common::{Event, MockDb, Script, account_shape};
use daokit::connection::CallOutcome;
use daokit::{
    Arg, CallContext, Dao, DaoEnv, DaoError, EntityShape, FieldShape, InterfaceDescriptor,
    IsolationLevel, MacroKind, MethodDecl, OperationKind, Record, TypeShape, Value,
};
use std::sync::Arc;

fn compile(db: &Arc<MockDb>, interface: InterfaceDescriptor) -> Dao {
    Dao::compile(&interface, Arc::new(DaoEnv::new(db.clone()))).unwrap()
}

fn account_row(id: i64, name: &str, city: &str) -> Vec<Value> {
    vec![Value::Integer(id), Value::from(name), Value::from(city)]
}

const ACCOUNT_COLUMNS: [&str; 3] = ["id", "first_name", "city"];

fn last_params(db: &MockDb) -> Vec<Value> {
    match db.last_query() {
        Some(Event::Query { params, .. }) => params,
        other => panic!("expected a query, got {:?}", other),
    }
}

fn last_sql(db: &MockDb) -> String {
    match db.last_query() {
        Some(Event::Query { sql, .. }) => sql,
        other => panic!("expected a query, got {:?}", other),
    }
}

#[tokio::test]
async fn test_find_only_one_row_counts() {
    let db = MockDb::shared("query-only-one");
    let account = account_shape();
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao").method(
            MethodDecl::select("byName", "SELECT * FROM account WHERE first_name = :name")
                .bind("name", TypeShape::Text, "name")
                .op(OperationKind::FindOnlyOne)
                .returns(TypeShape::optional(TypeShape::entity(&account))),
        ),
    );

    // No row: absent, not an error.
    let none = dao.call("byName", [Arg::val("ann")]).await.unwrap();
    assert_eq!(none.into_value().unwrap(), Value::Null);
    match db.last_query() {
        Some(Event::Query { sql, params, options, .. }) => {
            assert_eq!(sql, "SELECT * FROM account WHERE first_name = ?");
            assert_eq!(params, vec![Value::from("ann")]);
            assert_eq!(options.max_rows, Some(2));
        }
        other => panic!("unexpected {:?}", other),
    }

    db.script("first_name = ?", Script::rows(&ACCOUNT_COLUMNS, vec![account_row(1, "ann", "Oslo")]));
    let one = dao.call("byName", [Arg::val("ann")]).await.unwrap().into_value().unwrap();
    let record = one.as_record().unwrap();
    assert_eq!(record.get("id"), Some(&Value::Integer(1)));
    assert_eq!(record.get("city"), Some(&Value::from("Oslo")));

    db.script(
        "first_name = ?",
        Script::rows(&ACCOUNT_COLUMNS, vec![account_row(1, "ann", "Oslo"), account_row(2, "ann", "Rome")]),
    );
    let err = dao.call("byName", [Arg::val("ann")]).await.unwrap_err();
    assert!(matches!(err, DaoError::DuplicateResult(_)));
}

#[tokio::test]
async fn test_first_or_fail_for_required_entity() {
    let db = MockDb::shared("query-first");
    let account = account_shape();
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao").method(
            MethodDecl::select("firstInCity", "SELECT * FROM account WHERE city = ?")
                .param("city", TypeShape::Text)
                .returns(TypeShape::entity(&account)),
        ),
    );

    let err = dao.call("firstInCity", [Arg::val("Oslo")]).await.unwrap_err();
    assert!(matches!(err, DaoError::NoResult(_)));

    db.script(
        "city = ?",
        Script::rows(&ACCOUNT_COLUMNS, vec![account_row(4, "cy", "Oslo"), account_row(5, "dee", "Oslo")]),
    );
    let first = dao.call("firstInCity", [Arg::val("Oslo")]).await.unwrap().into_value().unwrap();
    assert_eq!(first.as_record().unwrap().get("id"), Some(&Value::Integer(4)));
    match db.last_query() {
        Some(Event::Query { options, .. }) => assert_eq!(options.max_rows, Some(1)),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_scalar_and_existence() {
    let db = MockDb::shared("query-scalar");
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao")
            .method(
                MethodDecl::select("countInCity", "SELECT COUNT(*) FROM account WHERE city = ?")
                    .param("city", TypeShape::Text)
                    .returns(TypeShape::Integer),
            )
            .method(
                MethodDecl::select("existsInCity", "SELECT 1 FROM account WHERE city = :city")
                    .bind("city", TypeShape::Text, "city")
                    .returns(TypeShape::Boolean),
            ),
    );

    assert_eq!(dao.call("countInCity", [Arg::val("Oslo")]).await.unwrap().get::<i64>().unwrap(), 0);
    assert!(!dao.call("existsInCity", [Arg::val("Oslo")]).await.unwrap().get::<bool>().unwrap());

    db.script("COUNT(*)", Script::rows(&["count"], vec![vec![Value::Integer(3)]]));
    db.script("SELECT 1", Script::rows(&["one"], vec![vec![Value::Integer(1)]]));
    assert_eq!(dao.call("countInCity", [Arg::val("Oslo")]).await.unwrap().get::<i64>().unwrap(), 3);
    assert!(dao.call("existsInCity", [Arg::val("Oslo")]).await.unwrap().get::<bool>().unwrap());
}

#[tokio::test]
async fn test_mapper_and_filter_arguments() {
    let db = MockDb::shared("query-mapper");
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao").method(
            MethodDecl::select("namesIn", "SELECT * FROM account WHERE city = ?")
                .param("city", TypeShape::Text)
                .filter()
                .mapper()
                .returns(TypeShape::list(TypeShape::Any)),
        ),
    );
    db.script(
        "city = ?",
        Script::rows(
            &ACCOUNT_COLUMNS,
            vec![account_row(1, "ann", "Oslo"), account_row(2, "bob", "Oslo"), account_row(3, "cy", "Oslo")],
        ),
    );

    let names = dao
        .call(
            "namesIn",
            [
                Arg::val("Oslo"),
                Arg::filter(|row| row.get_by_label("id").and_then(Value::as_i64) != Some(2)),
                Arg::mapper(|row| Ok(row.get_by_label("first_name").cloned().unwrap_or(Value::Null))),
            ],
        )
        .await
        .unwrap()
        .get::<Vec<String>>()
        .unwrap();
    assert_eq!(names, vec!["ann".to_string(), "cy".to_string()]);
    assert_eq!(last_params(&db), vec![Value::from("Oslo")]);
}

#[tokio::test]
async fn test_extractor_and_data_set() {
    let db = MockDb::shared("query-extractor");
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao")
            .method(MethodDecl::select("summary", "SELECT * FROM account").extractor().returns(TypeShape::Any))
            .method(MethodDecl::select("table", "SELECT * FROM account").returns(TypeShape::DataSet)),
    );
    db.script(
        "FROM account",
        Script::rows(&ACCOUNT_COLUMNS, vec![account_row(1, "ann", "Oslo"), account_row(2, "bob", "Rome")]),
    );

    let summary = dao
        .call("summary", [Arg::extractor(|ds| Ok(Value::Integer(ds.row_count() as i64 * 100)))])
        .await
        .unwrap();
    assert_eq!(summary.get::<i64>().unwrap(), 200);

    let table = dao.call("table", Vec::<Arg>::new()).await.unwrap().into_table().unwrap();
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.get(1, "city"), Some(&Value::from("Rome")));
}

#[tokio::test]
async fn test_stream_is_lazy_outside_transaction() {
    let db = MockDb::shared("query-stream");
    let account = account_shape();
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao").method(
            MethodDecl::select("all", "SELECT * FROM account").returns(TypeShape::stream(TypeShape::entity(&account))),
        ),
    );
    db.script(
        "FROM account",
        Script::rows(&ACCOUNT_COLUMNS, vec![account_row(1, "ann", "Oslo"), account_row(2, "bob", "Rome")]),
    );

    let out = dao.call("all", Vec::<Arg>::new()).await.unwrap();
    assert!(matches!(out, daokit::Output::Stream(_)));
    let items = out.collect().await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].as_record().unwrap().get("first_name"), Some(&Value::from("bob")));
}

#[tokio::test]
async fn test_stream_inside_transaction_releases_connection() {
    let db = MockDb::shared("query-stream-tx");
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao")
            .method(MethodDecl::select("all", "SELECT * FROM account").returns(TypeShape::stream(TypeShape::Record))),
    );
    db.script("FROM account", Script::rows(&["id"], vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]));

    let tx = dao.begin_transaction(IsolationLevel::ReadCommitted).await.unwrap();
    let ctx = CallContext::in_transaction(Arc::clone(&tx));
    let out = dao.call_with(&ctx, "all", Vec::<Arg>::new()).await.unwrap();
    // Commit must not wait on the stream's connection.
    tx.commit().await.unwrap();
    assert_eq!(out.collect().await.unwrap().len(), 2);
    assert_eq!(db.commits(), 1);
}

#[tokio::test]
async fn test_macro_substitution_and_list_expansion() {
    let db = MockDb::shared("query-macros");
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao")
            .method(
                MethodDecl::select("fromTable", "SELECT * FROM {table} WHERE city = :city")
                    .define("table", TypeShape::Text, "table", MacroKind::Plain)
                    .bind("city", TypeShape::Text, "city")
                    .returns(TypeShape::list(TypeShape::Record)),
            )
            .method(
                MethodDecl::select("byIds", "SELECT * FROM account WHERE id IN (?)")
                    .expand("ids", TypeShape::list(TypeShape::Integer))
                    .returns(TypeShape::list(TypeShape::Record)),
            ),
    );

    dao.call("fromTable", [Arg::val("account_archive"), Arg::val("Oslo")]).await.unwrap();
    assert_eq!(last_sql(&db), "SELECT * FROM account_archive WHERE city = ?");
    assert_eq!(last_params(&db), vec![Value::from("Oslo")]);

    dao.call("byIds", [Arg::val(vec![3i64, 1, 2])]).await.unwrap();
    assert_eq!(last_sql(&db), "SELECT * FROM account WHERE id IN (?, ?, ?)");
    assert_eq!(last_params(&db), vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)]);

    dao.call("byIds", [Arg::val(Vec::<i64>::new())]).await.unwrap();
    assert_eq!(last_sql(&db), "SELECT * FROM account WHERE id IN (NULL)");
    assert!(last_params(&db).is_empty());
}

#[tokio::test]
async fn test_whole_object_binding() {
    let db = MockDb::shared("query-object");
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao").method(
            MethodDecl::select("matching", "SELECT * FROM account WHERE city = :f.city AND first_name = :f.name")
                .bind_object("filter", TypeShape::Record, Some("f"))
                .returns(TypeShape::list(TypeShape::Record)),
        ),
    );

    let filter = Record::new().with("name", "ann").with("city", "Oslo");
    dao.call("matching", [Arg::from(filter)]).await.unwrap();
    assert_eq!(last_params(&db), vec![Value::from("Oslo"), Value::from("ann")]);
}

#[tokio::test]
async fn test_join_fetch_merges_rows() {
    let db = MockDb::shared("query-join");
    let device = EntityShape::new("Device", "device")
        .field(FieldShape::new("id", TypeShape::Integer).id())
        .field(FieldShape::new("model", TypeShape::Text))
        .build();
    let user = EntityShape::new("User", "users")
        .field(FieldShape::new("id", TypeShape::Integer).id())
        .field(FieldShape::new("name", TypeShape::Text))
        .field(FieldShape::new("devices", TypeShape::list(TypeShape::entity(&device))))
        .build();
    let dao = compile(
        &db,
        InterfaceDescriptor::new("UserDao").method(
            MethodDecl::select(
                "withDevices",
                "SELECT u.id, u.name, d.id AS \"devices.id\", d.model AS \"devices.model\" FROM users u LEFT JOIN device d ON d.user_id = u.id",
            )
            .merged_by(&["id"])
            .returns(TypeShape::list(TypeShape::entity(&user))),
        ),
    );
    db.script(
        "FROM users",
        Script::rows(
            &["id", "name", "devices.id", "devices.model"],
            vec![
                vec![Value::Integer(1), Value::from("ann"), Value::Integer(10), Value::from("x1")],
                vec![Value::Integer(2), Value::from("bob"), Value::Null, Value::Null],
                vec![Value::Integer(1), Value::from("ann"), Value::Integer(11), Value::from("x2")],
            ],
        ),
    );

    let users = dao.call("withDevices", Vec::<Arg>::new()).await.unwrap().into_value().unwrap();
    let users = users.as_list().unwrap();
    assert_eq!(users.len(), 2);
    let ann = users[0].as_record().unwrap();
    assert_eq!(ann.get("devices").and_then(Value::size), Some(2));
    assert_eq!(users[1].as_record().unwrap().get("name"), Some(&Value::from("bob")));
}

#[tokio::test]
async fn test_grouped_map() {
    let db = MockDb::shared("query-grouped");
    let account = account_shape();
    let dao = compile(
        &db,
        InterfaceDescriptor::new("AccountDao").method(
            MethodDecl::select("byCity", "SELECT * FROM account")
                .group_by("city")
                .returns(TypeShape::map(TypeShape::Text, TypeShape::list(TypeShape::entity(&account)))),
        ),
    );
    db.script(
        "FROM account",
        Script::rows(
            &ACCOUNT_COLUMNS,
            vec![account_row(1, "ann", "Oslo"), account_row(2, "bob", "Rome"), account_row(3, "cy", "Oslo")],
        ),
    );

    let Value::Map(groups) = dao.call("byCity", Vec::<Arg>::new()).await.unwrap().into_value().unwrap() else {
        panic!("expected a map");
    };
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].0, Value::from("Oslo"));
    assert_eq!(groups[0].1.size(), Some(2));
}

#[tokio::test]
async fn test_call_with_out_parameters() {
    let db = MockDb::shared("query-call");
    let dao = compile(
        &db,
        InterfaceDescriptor::new("StatsDao").method(
            MethodDecl::call("stats", "{call account_stats(?, ?)}")
                .param("region", TypeShape::Text)
                .out_parameter(2, "total")
                .op(OperationKind::ExecuteAndGetOutParameters)
                .returns(TypeShape::Record),
        ),
    );
    db.script(
        "account_stats",
        Script::Call(CallOutcome {
            out_parameters: Record::new().with("total", 42i64),
            ..CallOutcome::default()
        }),
    );

    let out = dao.call("stats", [Arg::val("north")]).await.unwrap().into_value().unwrap();
    assert_eq!(out.as_record().unwrap().get("total"), Some(&Value::Integer(42)));
    let params = db
        .events()
        .into_iter()
        .find_map(|e| match e {
            Event::Call { params, .. } => Some(params),
            _ => None,
        })
        .unwrap();
    assert_eq!(params, vec![Value::from("north")]);
}
