use keepconnect::db::{db_kind_from_url, new_id, rewrite_sql, DbKind};

#[test]
fn test_db_kind_from_url_sqlite() {
    assert_eq!(db_kind_from_url("sqlite://test.db"), DbKind::Sqlite);
    assert_eq!(db_kind_from_url("SQLite://test.db?mode=rwc"), DbKind::Sqlite);
}

#[test]
fn test_db_kind_from_url_postgres() {
    assert_eq!(
        db_kind_from_url("postgres://localhost/keepconnect"),
        DbKind::Postgres
    );
    assert_eq!(
        db_kind_from_url("postgresql://localhost/keepconnect"),
        DbKind::Postgres
    );
}

#[test]
fn test_db_kind_from_url_default_sqlite() {
    assert_eq!(db_kind_from_url("mysql://localhost/testdb"), DbKind::Sqlite);
}

#[test]
fn test_rewrite_sql_sqlite() {
    let sql = "SELECT * FROM chatbot_options WHERE chatbot_id = ? AND option_key = ?";
    assert_eq!(rewrite_sql(sql, DbKind::Sqlite).as_ref(), sql);
}

#[test]
fn test_rewrite_sql_postgres_upsert() {
    let sql = "INSERT INTO conversation_states (id, owner_account_id, chat_id) VALUES (?, ?, ?) \
               ON CONFLICT(owner_account_id, chat_id) DO UPDATE SET last_message_time=excluded.last_message_time";
    let rewritten = rewrite_sql(sql, DbKind::Postgres);
    assert!(rewritten.contains("VALUES ($1, $2, $3)"));
    assert!(!rewritten.contains('?'));
}

#[test]
fn test_rewrite_sql_postgres_no_placeholders() {
    let sql = "SELECT * FROM chatbots";
    assert_eq!(rewrite_sql(sql, DbKind::Postgres).as_ref(), sql);
}

#[test]
fn test_ids_are_prefixed_and_unique() {
    let a = new_id("conv");
    let b = new_id("conv");
    assert!(a.starts_with("conv_"));
    assert_ne!(a, b);
    assert!(a["conv_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
}
