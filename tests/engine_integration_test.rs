//! End-to-end tests of the closure engine against the in-memory source.

use sql_subsetter::buffer::RowsBuffer;
use sql_subsetter::cancel::CancelToken;
use sql_subsetter::config::{DumpConfig, DumperConfig, FakerConfig, SourceDbConfig, TableConfig};
use sql_subsetter::engine::{DumpStats, Dumper};
use sql_subsetter::error::DumpError;
use sql_subsetter::source::{MemorySource, MemoryTable};
use sql_subsetter::value::SqlValue;

fn config_for(tables: Vec<TableConfig>) -> DumperConfig {
    let mut config = DumperConfig {
        source_db: SourceDbConfig {
            driver: "mysql".to_string(),
            dsn: "mysql://test@localhost/test".to_string(),
        },
        tables,
        dump: DumpConfig::default(),
    };
    config.normalize().unwrap();
    config
}

fn seeded(name: &str, query: &str) -> TableConfig {
    TableConfig {
        name: name.to_string(),
        select_queries: vec![query.to_string()],
        ..TableConfig::default()
    }
}

fn transitive(name: &str) -> TableConfig {
    TableConfig {
        name: name.to_string(),
        ..TableConfig::default()
    }
}

fn dump(config: &DumperConfig, source: &MemorySource) -> (String, DumpStats) {
    let mut out = Vec::new();
    let mut dumper = Dumper::new(config, source, CancelToken::new());
    let stats = dumper.run(&mut out).unwrap();
    (String::from_utf8(out).unwrap(), stats)
}

fn users_posts_source() -> MemorySource {
    MemorySource::new(vec![
        MemoryTable::new("users")
            .column("id", "int(11)", false)
            .column("name", "varchar(255)", true)
            .primary_key(&["id"])
            .row(vec![SqlValue::from("42"), SqlValue::from("alice")]),
        MemoryTable::new("posts")
            .column("id", "int(11)", false)
            .column("user_id", "int(11)", true)
            .column("body", "varchar(255)", true)
            .primary_key(&["id"])
            .foreign_key("fk_post_user", &["user_id"], "users", &["id"])
            .row(vec![
                SqlValue::from("1"),
                SqlValue::from("42"),
                SqlValue::from("hi"),
            ]),
    ])
}

// S1: acyclic chain dumps leaves first with no FK-checks pragma.
#[test]
fn test_acyclic_chain() {
    let source = users_posts_source();
    let config = config_for(vec![
        seeded("posts", "SELECT id FROM posts WHERE id = 1"),
        transitive("users"),
    ]);

    let (out, stats) = dump(&config, &source);

    assert!(out.contains("CREATE TABLE `posts`"));
    assert!(out.contains("CREATE TABLE `users`"));
    // Both tables are configured, so the FK constraint survives.
    assert!(out.contains("REFERENCES `users`"));

    let users_insert = out.find("INSERT INTO users").unwrap();
    let posts_insert = out.find("INSERT INTO posts").unwrap();
    assert!(users_insert < posts_insert, "referenced rows come first");

    assert!(out.contains("INSERT INTO users (id, name) VALUES\n\t(42, 'alice')\nON DUPLICATE KEY UPDATE id = VALUES(id), name = VALUES(name);\n"));
    assert!(out.contains("(1, 42, 'hi')"));
    assert!(!out.contains("FOREIGN_KEY_CHECKS"));

    assert_eq!(stats.tables_dumped, 2);
    assert_eq!(stats.rows_emitted, 2);
    assert!(!stats.cycle_detected);
    assert_eq!(stats.bytes_written, out.len() as u64);
}

// S2: a two-table reference cycle flips the FK-checks pragma.
#[test]
fn test_cycle_disables_fk_checks() {
    let source = MemorySource::new(vec![
        MemoryTable::new("a")
            .column("id", "int(11)", false)
            .column("b_id", "int(11)", false)
            .primary_key(&["id"])
            .foreign_key("fk_a_b", &["b_id"], "b", &["id"])
            .row(vec![SqlValue::from("1"), SqlValue::from("7")]),
        MemoryTable::new("b")
            .column("id", "int(11)", false)
            .column("a_id", "int(11)", false)
            .primary_key(&["id"])
            .foreign_key("fk_b_a", &["a_id"], "a", &["id"])
            .row(vec![SqlValue::from("7"), SqlValue::from("1")]),
    ]);
    let config = config_for(vec![
        seeded("a", "SELECT id FROM a WHERE id = 1"),
        transitive("b"),
    ]);

    let (out, stats) = dump(&config, &source);

    assert!(out.starts_with(
        "# Disable FK checks because references cycle detected\nSET FOREIGN_KEY_CHECKS = 0;\n\n"
    ));
    assert!(stats.cycle_detected);
    assert_eq!(stats.rows_emitted, 2);

    // Both rows made it out exactly once despite the cycle.
    assert_eq!(out.matches("INSERT INTO a ").count(), 1);
    assert_eq!(out.matches("INSERT INTO b ").count(), 1);
}

// S3: a configured faker replaces the real value with a synthetic one.
#[test]
fn test_faker_overrides_email() {
    let source = MemorySource::new(vec![MemoryTable::new("users")
        .column("id", "int(11)", false)
        .column("email", "varchar(255)", true)
        .primary_key(&["id"])
        .row(vec![SqlValue::from("1"), SqlValue::from("real@x")])]);

    let config = config_for(vec![TableConfig {
        fakers: vec![FakerConfig {
            columns: vec!["email".to_string()],
            kind: "email".to_string(),
            ..FakerConfig::default()
        }],
        ..seeded("users", "SELECT id FROM users WHERE id = 1")
    }]);

    let (out, _) = dump(&config, &source);

    assert!(!out.contains("real@x"));
    let email = regex::Regex::new(r"'[a-z]+\.[a-z]+@[a-z]{5}\.(com|net|org|gov)'").unwrap();
    assert!(email.is_match(&out), "no synthetic email in: {out}");
}

// S4: ignored columns emit their declared default instead of the data.
#[test]
fn test_ignored_column_uses_default() {
    let source = MemorySource::new(vec![MemoryTable::new("orders")
        .column("id", "int(11)", false)
        .column_with_default("note", "varchar(255)", false, "n/a")
        .primary_key(&["id"])
        .row(vec![SqlValue::from("1"), SqlValue::from("secret")])]);

    let config = config_for(vec![TableConfig {
        ignore_columns: vec!["note".to_string()],
        ..seeded("orders", "SELECT id FROM orders WHERE id = 1")
    }]);

    let (out, _) = dump(&config, &source);

    assert!(out.contains("(1, 'n/a')"));
    assert!(!out.contains("secret"));
}

// S5: a LIMIT inside the seed subquery forces the pre-execution rewrite.
#[test]
fn test_limit_in_seed_subquery_is_pre_executed() {
    let source = MemorySource::new(vec![MemoryTable::new("t")
        .column("id", "int(11)", false)
        .column("grp", "int(11)", false)
        .primary_key(&["id"])
        .row(vec![SqlValue::from("1"), SqlValue::from("1")])
        .row(vec![SqlValue::from("2"), SqlValue::from("1")])
        .row(vec![SqlValue::from("3"), SqlValue::from("0")])]);

    let config = config_for(vec![seeded(
        "t",
        "SELECT id FROM t WHERE grp = 1 LIMIT 10",
    )]);

    let (_, stats) = dump(&config, &source);
    assert_eq!(stats.rows_emitted, 2);

    let executed = source.executed();
    assert!(executed
        .iter()
        .any(|q| q.contains("WHERE id IN (?, ?)")));
    assert!(!executed.iter().any(|q| q.contains("IN (SELECT")));
}

// S6: spilling to disk must not change a single output byte.
#[test]
fn test_spill_output_is_byte_identical() {
    let rows: Vec<Vec<SqlValue>> = (1..=30)
        .map(|i| {
            vec![
                SqlValue::from(i.to_string()),
                SqlValue::from("1"),
                SqlValue::from("x".repeat(100)),
            ]
        })
        .collect();

    let table = || {
        let mut t = MemoryTable::new("big")
            .column("id", "int(11)", false)
            .column("grp", "int(11)", false)
            .column("payload", "varchar(255)", true)
            .primary_key(&["id"]);
        for row in &rows {
            t = t.row(row.clone());
        }
        t
    };

    let config = config_for(vec![seeded("big", "SELECT id FROM big WHERE grp = 1")]);

    let source = MemorySource::new(vec![table()]);
    let mut spilled_out = Vec::new();
    let mut spilled = Dumper::with_buffer(
        &config,
        &source,
        CancelToken::new(),
        RowsBuffer::with_threshold(64),
    );
    spilled.run(&mut spilled_out).unwrap();

    let source = MemorySource::new(vec![table()]);
    let (in_memory_out, stats) = dump(&config, &source);

    assert_eq!(stats.rows_emitted, 30);
    assert_eq!(String::from_utf8(spilled_out).unwrap(), in_memory_out);
}

#[test]
fn test_null_fk_tuple_is_dropped() {
    let source = MemorySource::new(vec![
        MemoryTable::new("users")
            .column("id", "int(11)", false)
            .column("name", "varchar(255)", true)
            .primary_key(&["id"])
            .row(vec![SqlValue::from("42"), SqlValue::from("alice")]),
        MemoryTable::new("posts")
            .column("id", "int(11)", false)
            .column("user_id", "int(11)", true)
            .column("body", "varchar(255)", true)
            .primary_key(&["id"])
            .foreign_key("fk_post_user", &["user_id"], "users", &["id"])
            .row(vec![
                SqlValue::from("1"),
                SqlValue::from("42"),
                SqlValue::from("hi"),
            ])
            .row(vec![
                SqlValue::from("2"),
                SqlValue::Null,
                SqlValue::from("orphan"),
            ]),
    ]);
    let config = config_for(vec![
        seeded("posts", "SELECT id FROM posts WHERE body = 'orphan'"),
        transitive("users"),
    ]);

    let (out, stats) = dump(&config, &source);

    assert!(out.contains("(2, NULL, 'orphan')"));
    assert!(!out.contains("INSERT INTO users"));
    assert_eq!(stats.rows_emitted, 1);
}

#[test]
fn test_unconfigured_fk_target_is_pruned() {
    let source = users_posts_source();
    let config = config_for(vec![seeded("posts", "SELECT id FROM posts WHERE id = 1")]);

    let (out, stats) = dump(&config, &source);

    // users is never touched: not selected, not introspected.
    assert!(!out.contains("INSERT INTO users"));
    assert!(!source.executed().iter().any(|q| q.contains("DESCRIBE `users`")));
    assert_eq!(stats.rows_emitted, 1);

    // The dangling constraint is stripped and the comma repaired.
    assert!(!out.contains("REFERENCES `users`"));
    assert!(out.contains("PRIMARY KEY (`id`)\n) ENGINE=InnoDB"));
}

#[test]
fn test_shared_reference_is_emitted_once() {
    let source = MemorySource::new(vec![
        MemoryTable::new("users")
            .column("id", "int(11)", false)
            .column("name", "varchar(255)", true)
            .primary_key(&["id"])
            .row(vec![SqlValue::from("42"), SqlValue::from("alice")]),
        MemoryTable::new("posts")
            .column("id", "int(11)", false)
            .column("user_id", "int(11)", false)
            .primary_key(&["id"])
            .foreign_key("fk_post_user", &["user_id"], "users", &["id"])
            .row(vec![SqlValue::from("1"), SqlValue::from("42")])
            .row(vec![SqlValue::from("2"), SqlValue::from("42")]),
    ]);
    let config = config_for(vec![
        seeded("posts", "SELECT id FROM posts WHERE user_id = 42"),
        transitive("users"),
    ]);

    let (out, stats) = dump(&config, &source);

    assert_eq!(out.matches("INSERT INTO users").count(), 1);
    assert_eq!(out.matches("(42, 'alice')").count(), 1);
    assert_eq!(stats.rows_emitted, 3);
}

#[test]
fn test_second_seed_does_not_duplicate_rows() {
    let source = users_posts_source();
    let config = config_for(vec![
        TableConfig {
            select_queries: vec![
                "SELECT id FROM posts WHERE id = 1".to_string(),
                "SELECT id FROM posts".to_string(),
            ],
            ..transitive("posts")
        },
        transitive("users"),
    ]);

    let (out, _) = dump(&config, &source);

    // The overlapping second seed re-selects row 1; the seen set keeps it
    // out of the output.
    assert_eq!(out.matches("(1, 42, 'hi')").count(), 1);
    assert_eq!(out.matches("(42, 'alice')").count(), 1);
}

#[test]
fn test_composite_foreign_key_traversal() {
    let source = MemorySource::new(vec![
        MemoryTable::new("memberships")
            .column("user_id", "int(11)", false)
            .column("group_id", "int(11)", false)
            .column("role", "varchar(32)", true)
            .primary_key(&["user_id", "group_id"])
            .row(vec![
                SqlValue::from("3"),
                SqlValue::from("9"),
                SqlValue::from("admin"),
            ]),
        MemoryTable::new("enrollments")
            .column("id", "int(11)", false)
            .column("user_id", "int(11)", false)
            .column("group_id", "int(11)", false)
            .primary_key(&["id"])
            .foreign_key(
                "fk_enrollment_membership",
                &["user_id", "group_id"],
                "memberships",
                &["user_id", "group_id"],
            )
            .row(vec![
                SqlValue::from("1"),
                SqlValue::from("3"),
                SqlValue::from("9"),
            ])
            .row(vec![
                SqlValue::from("2"),
                SqlValue::from("3"),
                SqlValue::from("9"),
            ]),
    ]);
    let config = config_for(vec![
        seeded("enrollments", "SELECT id FROM enrollments WHERE user_id = 3"),
        transitive("memberships"),
    ]);

    let (out, stats) = dump(&config, &source);

    // Two enrollments share one membership: the tuple dedup collapses
    // them into a single composite lookup and a single emitted row.
    assert_eq!(out.matches("(3, 9, 'admin')").count(), 1);
    assert!(source
        .executed()
        .iter()
        .any(|q| q.contains("WHERE (user_id, group_id) IN ((?, ?))")));
    assert_eq!(stats.rows_emitted, 3);
}

#[test]
fn test_self_referential_table() {
    let source = MemorySource::new(vec![MemoryTable::new("employees")
        .column("id", "int(11)", false)
        .column("manager_id", "int(11)", true)
        .primary_key(&["id"])
        .foreign_key("fk_manager", &["manager_id"], "employees", &["id"])
        .row(vec![SqlValue::from("1"), SqlValue::Null])
        .row(vec![SqlValue::from("2"), SqlValue::from("1")])]);
    let config = config_for(vec![seeded(
        "employees",
        "SELECT id FROM employees WHERE id = 2",
    )]);

    let (out, stats) = dump(&config, &source);

    assert!(stats.cycle_detected);
    assert!(out.starts_with("# Disable FK checks"));
    assert_eq!(stats.rows_emitted, 2);

    // The manager's statement lands in the buffer before the report's.
    let manager = out.find("(1, NULL)").unwrap();
    let report = out.find("(2, 1)").unwrap();
    assert!(manager < report);
}

#[test]
fn test_empty_seed_result() {
    let source = users_posts_source();
    let config = config_for(vec![
        seeded("posts", "SELECT id FROM posts WHERE id = 999"),
        transitive("users"),
    ]);

    let (out, stats) = dump(&config, &source);

    assert_eq!(stats.rows_emitted, 0);
    assert_eq!(stats.tables_dumped, 0);
    assert!(out.contains("CREATE TABLE `posts`"));
    assert!(!out.contains("INSERT INTO"));
}

#[test]
fn test_projection_keeps_mandatory_columns() {
    let source = users_posts_source();
    let config = config_for(vec![
        TableConfig {
            allow_columns: vec!["body".to_string()],
            ..seeded("posts", "SELECT id FROM posts WHERE id = 1")
        },
        transitive("users"),
    ]);

    let (out, _) = dump(&config, &source);

    // PK and FK columns are forced into the projection, declared order.
    assert!(source
        .executed()
        .iter()
        .any(|q| q.starts_with("SELECT id, user_id, body FROM posts")));
    // And the FK was still traversable.
    assert!(out.contains("INSERT INTO users"));
}

#[test]
fn test_ignored_key_column_still_traverses() {
    let source = users_posts_source();
    let config = config_for(vec![
        TableConfig {
            ignore_columns: vec!["user_id".to_string()],
            ..seeded("posts", "SELECT id FROM posts WHERE id = 1")
        },
        transitive("users"),
    ]);

    let (out, _) = dump(&config, &source);

    // The FK column stays in the projection so traversal works, but the
    // emitted cell is the column default and the update list skips it.
    assert!(out.contains("INSERT INTO users"));
    assert!(out.contains("(1, NULL, 'hi')"));
    assert!(out.contains("ON DUPLICATE KEY UPDATE id = VALUES(id), body = VALUES(body);"));
}

#[test]
fn test_unknown_allow_column_is_config_error() {
    let source = users_posts_source();
    let config = config_for(vec![TableConfig {
        allow_columns: vec!["bogus".to_string()],
        ..seeded("posts", "SELECT id FROM posts WHERE id = 1")
    }]);

    let mut dumper = Dumper::new(&config, &source, CancelToken::new());
    let err = dumper.run(&mut std::io::sink()).unwrap_err();
    assert!(matches!(err, DumpError::Config(_)));
}

#[test]
fn test_table_without_primary_key_is_schema_error() {
    let source = MemorySource::new(vec![MemoryTable::new("log")
        .column("id", "int(11)", false)
        .column("line", "text", true)
        .row(vec![SqlValue::from("1"), SqlValue::from("boom")])]);
    let config = config_for(vec![seeded("log", "SELECT id FROM log")]);

    let mut dumper = Dumper::new(&config, &source, CancelToken::new());
    let err = dumper.run(&mut std::io::sink()).unwrap_err();
    assert!(matches!(err, DumpError::Schema(_)));
}

#[test]
fn test_only_data_skips_create_statements() {
    let source = users_posts_source();
    let mut config = config_for(vec![
        seeded("posts", "SELECT id FROM posts WHERE id = 1"),
        transitive("users"),
    ]);
    config.dump.only_data = true;

    let (out, _) = dump(&config, &source);

    assert!(!out.contains("CREATE TABLE"));
    assert!(out.contains("INSERT INTO posts"));
}

#[test]
fn test_create_tables_if_not_exist() {
    let source = users_posts_source();
    let mut config = config_for(vec![seeded("posts", "SELECT id FROM posts WHERE id = 1")]);
    config.dump.create_tables_if_not_exist = true;

    let (out, _) = dump(&config, &source);
    assert!(out.contains("CREATE TABLE IF NOT EXISTS `posts`"));
}

#[test]
fn test_add_column_name_annotations() {
    let source = users_posts_source();
    let mut config = config_for(vec![
        seeded("posts", "SELECT id FROM posts WHERE id = 1"),
        transitive("users"),
    ]);
    config.dump.add_column_name = true;

    let (out, _) = dump(&config, &source);
    assert!(out.contains("\n\t\t# body\n\t\t'hi'"));
}

#[test]
fn test_cancelled_run() {
    let source = users_posts_source();
    let config = config_for(vec![seeded("posts", "SELECT id FROM posts WHERE id = 1")]);

    let cancel = CancelToken::new();
    cancel.cancel();
    let mut dumper = Dumper::new(&config, &source, cancel);
    let err = dumper.run(&mut std::io::sink()).unwrap_err();
    assert!(matches!(err, DumpError::Cancelled));
}
