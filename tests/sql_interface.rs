use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use courtbook::auth::AdminGate;
use courtbook::config::Schedule;
use courtbook::engine::Engine;
use courtbook::wire::{self, CourtFactory};

const PASSWORD: &str = "courtbook";
const ADMIN_SECRET: &str = "let-me-in";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("courtbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("courtbook.wal"), Schedule::default()).unwrap());
    let factory = Arc::new(CourtFactory::new(
        engine,
        PASSWORD.to_string(),
        AdminGate::new(Some(ADMIN_SECRET.to_string())),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory, None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("courtbook")
        .user("courtbook")
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Result<Vec<SimpleQueryRow>, tokio_postgres::Error> {
    let messages = client.simple_query(sql).await?;
    Ok(messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect())
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

/// Book and return `(id, cancel_credential)`.
async fn book(client: &tokio_postgres::Client, resource: &str, start: &str, minutes: u32) -> (String, String) {
    let sql = format!(
        "INSERT INTO reservations (resource, start, minutes, holder_name, contact, note) \
         VALUES ('{resource}', '{start}', {minutes}, 'Mario Rossi', '333 1234567', NULL)"
    );
    let receipt = rows(client, &sql).await.unwrap();
    assert_eq!(receipt.len(), 1);
    (
        receipt[0].get("id").unwrap().to_string(),
        receipt[0].get("cancel_credential").unwrap().to_string(),
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn lists_configured_resources() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let resources = rows(&client, "SELECT * FROM resources").await.unwrap();
    let names: Vec<&str> = resources.iter().map(|r| r.get("name").unwrap()).collect();
    assert_eq!(names, vec!["Campo 1", "Campo 2"]);
    assert_eq!(resources[1].get("position"), Some("1"));
}

#[tokio::test]
async fn book_shows_up_in_slots_and_reservations() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let (id, credential) = book(&client, "Campo 1", "2026-07-15T10:00", 90).await;
    assert_eq!(credential.len(), 64);

    let slots = rows(
        &client,
        "SELECT * FROM slots WHERE resource = 'Campo 1' AND day = '2026-07-15'",
    )
    .await
    .unwrap();
    assert_eq!(slots.len(), 27);
    let slot = |local: &str| {
        slots
            .iter()
            .find(|r| r.get("local_start") == Some(local))
            .unwrap()
    };
    let nine = slot("2026-07-15T09:00");
    assert_eq!(nine.get("available"), Some("t"));
    assert_eq!(nine.get("start"), Some("2026-07-15T09:00:00+02:00"));
    assert_eq!(nine.get("durations"), Some("60"));
    let half_past_ten = slot("2026-07-15T10:30");
    assert_eq!(half_past_ten.get("available"), Some("f"));
    assert_eq!(half_past_ten.get("durations"), Some(""));
    assert_eq!(slot("2026-07-15T11:30").get("durations"), Some("60,90,120"));

    let listed = rows(
        &client,
        "SELECT * FROM reservations WHERE resource = 'Campo 1' AND day = '2026-07-15'",
    )
    .await
    .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(id.as_str()));
    assert_eq!(listed[0].get("end"), Some("2026-07-15T11:30:00+02:00"));
    assert_eq!(listed[0].get("minutes"), Some("90"));
}

#[tokio::test]
async fn overlapping_booking_is_a_conflict() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    book(&client, "Campo 1", "2026-07-15T18:00", 120).await;
    let err = rows(
        &client,
        "INSERT INTO reservations (resource, start, minutes, holder_name) \
         VALUES ('Campo 1', '2026-07-15T19:00', 60, 'Luca')",
    )
    .await
    .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    // Same time on the other court is fine.
    book(&client, "Campo 2", "2026-07-15T19:00", 60).await;
}

#[tokio::test]
async fn validation_errors_carry_their_sqlstate() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let cases = [
        ("Campo 9", "2026-07-15T10:00", 60, "CB001"),
        ("Campo 1", "2026-07-15T10:00", 45, "CB002"),
        ("Campo 1", "tomorrow", 60, "CB003"),
        ("Campo 1", "2026-07-15T08:10", 60, "CB004"),
        ("Campo 1", "2026-07-15T21:30", 90, "CB005"),
    ];
    for (resource, start, minutes, code) in cases {
        let sql = format!(
            "INSERT INTO reservations (resource, start, minutes, holder_name) \
             VALUES ('{resource}', '{start}', {minutes}, 'Anna')"
        );
        let err = rows(&client, &sql).await.unwrap_err();
        assert_eq!(sqlstate(&err), Some(code), "{resource} {start} {minutes}");
    }

    let err = rows(
        &client,
        "INSERT INTO reservations (resource, start, minutes, holder_name) \
         VALUES ('Campo 1', '2026-07-15T10:00', 60, ' ')",
    )
    .await
    .unwrap_err();
    assert_eq!(sqlstate(&err), Some("CB006"));

    let err = rows(&client, "SELECT * FROM nonsense").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));
}

#[tokio::test]
async fn cancel_requires_matching_credential() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let (id, credential) = book(&client, "Campo 1", "2026-07-15T12:00", 60).await;

    let err = rows(
        &client,
        &format!("DELETE FROM reservations WHERE id = '{id}' AND credential = 'wrong'"),
    )
    .await
    .unwrap_err();
    assert_eq!(sqlstate(&err), Some("CB009"));

    client
        .batch_execute(&format!(
            "DELETE FROM reservations WHERE id = '{id}' AND credential = '{credential}'"
        ))
        .await
        .unwrap();

    let err = rows(
        &client,
        &format!("DELETE FROM reservations WHERE id = '{id}' AND credential = '{credential}'"),
    )
    .await
    .unwrap_err();
    assert_eq!(sqlstate(&err), Some("CB008"));

    // The slot is bookable again.
    book(&client, "Campo 1", "2026-07-15T12:00", 60).await;
}

#[tokio::test]
async fn export_requires_admin_secret() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    book(&client, "Campo 2", "2026-07-15T09:00", 60).await;
    book(&client, "Campo 1", "2026-07-15T09:00", 60).await;

    let err = rows(&client, "SELECT * FROM all_reservations").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("28P01"));
    let err = rows(&client, "SELECT * FROM all_reservations WHERE admin_secret = 'guess'")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("28P01"));

    let all = rows(
        &client,
        &format!("SELECT * FROM all_reservations WHERE admin_secret = '{ADMIN_SECRET}'"),
    )
    .await
    .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].get("resource"), Some("Campo 1"));
    assert_eq!(all[1].get("resource"), Some("Campo 2"));
    assert_eq!(all[0].get("contact"), Some("333 1234567"));
    assert_eq!(all[0].get("note"), None);
}

#[tokio::test]
async fn availability_lists_free_windows() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    book(&client, "Campo 1", "2026-07-15T08:00", 120).await;
    let windows = rows(
        &client,
        "SELECT * FROM availability WHERE resource = 'Campo 1' AND day = '2026-07-15'",
    )
    .await
    .unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].get("start"), Some("2026-07-15T10:00:00+02:00"));
    assert_eq!(windows[0].get("end"), Some("2026-07-15T22:00:00+02:00"));
    assert_eq!(windows[0].get("minutes"), Some("720"));
}

#[tokio::test]
async fn prepared_booking_keeps_dollar_signs_in_values() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let receipt = client
        .query(
            "INSERT INTO reservations (resource, start, minutes, holder_name, contact, note) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &"Campo 1",
                &"2026-07-15T10:00",
                &"60",
                &"Mario $2 Rossi",
                &"",
                &"court fee $1 paid",
            ],
        )
        .await
        .unwrap();
    assert_eq!(receipt.len(), 1);
    let id: &str = receipt[0].get("id");
    let credential: &str = receipt[0].get("cancel_credential");
    assert_eq!(credential.len(), 64);

    let all = rows(
        &client,
        &format!("SELECT * FROM all_reservations WHERE admin_secret = '{ADMIN_SECRET}'"),
    )
    .await
    .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("id"), Some(id));
    assert_eq!(all[0].get("holder_name"), Some("Mario $2 Rossi"));
    assert_eq!(all[0].get("note"), Some("court fee $1 paid"));
    assert_eq!(all[0].get("contact"), None);

    // Cancel through the extended protocol as well.
    client
        .execute(
            "DELETE FROM reservations WHERE id = $1 AND credential = $2",
            &[&id, &credential],
        )
        .await
        .unwrap();
    assert!(
        rows(&client, "SELECT * FROM reservations WHERE resource = 'Campo 1'")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn concurrent_clients_one_winner() {
    let addr = start_test_server().await;
    let a = connect(addr).await;
    let b = connect(addr).await;

    let insert = |start: &str| {
        format!(
            "INSERT INTO reservations (resource, start, minutes, holder_name) \
             VALUES ('Campo 1', '{start}', 90, 'Racer')"
        )
    };
    let (sql_a, sql_b) = (insert("2026-07-15T16:00"), insert("2026-07-15T16:30"));
    let (ra, rb) = tokio::join!(rows(&a, &sql_a), rows(&b, &sql_b));

    assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);
    let err = ra.err().or(rb.err()).unwrap();
    assert_eq!(sqlstate(&err), Some("23P01"));
}
