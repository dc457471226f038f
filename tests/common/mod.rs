//! Shared fixtures for store integration tests: a disposable Postgres
//! container migrated to head revision, plus raw-message builders.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner;

use mailvault::store::migrations;

pub struct TestDatabase {
    pub pool: PgPool,
    _container: ContainerAsync<Postgres>,
}

impl TestDatabase {
    pub async fn new() -> Self {
        let container = Postgres::default()
            .start()
            .await
            .expect("start postgres container");
        let host = container.get_host().await.expect("container host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("mapped postgres port");
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("connect to test database");
        migrations::upgrade(&pool).await.expect("run migrations");
        TestDatabase {
            pool,
            _container: container,
        }
    }
}

/// Build a raw RFC 5322 message with the given headers.
pub fn make_message(
    message_id: &str,
    sender: &str,
    subject: &str,
    date: &str,
    in_reply_to: Option<&str>,
    body: &str,
) -> Vec<u8> {
    let mut raw = String::new();
    raw.push_str(&format!("Message-ID: <{}>\n", message_id));
    raw.push_str(&format!("From: {}\n", sender));
    raw.push_str(&format!("Subject: {}\n", subject));
    raw.push_str(&format!("Date: {}\n", date));
    if let Some(parent) = in_reply_to {
        raw.push_str(&format!("In-Reply-To: <{}>\n", parent));
    }
    raw.push_str("Content-Type: text/plain; charset=utf-8\n\n");
    raw.push_str(body);
    raw.into_bytes()
}
