//! CLI smoke tests: drive the `stockfolio` binary end-to-end against a
//! throwaway database file, exercising the buy/sell/positions/pnl surface.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn stockfolio(db_path: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("stockfolio").unwrap();
    cmd.arg("--db-path").arg(db_path);
    cmd
}

#[test]
fn help_lists_top_level_commands() {
    let dir = TempDir::new().unwrap();
    stockfolio(&dir.path().join("unused.db"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("buy"))
        .stdout(predicate::str::contains("sell"))
        .stdout(predicate::str::contains("analyze"));
}

#[test]
fn missing_subcommand_fails() {
    let dir = TempDir::new().unwrap();
    stockfolio(&dir.path().join("unused.db")).assert().failure();
}

#[test]
fn buy_then_positions_reports_the_lot() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stockfolio.db");

    stockfolio(&db)
        .args(["buy", "-s", "AAPL", "-q", "10", "-p", "150.00", "-d", "2024-01-10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("recorded buy transaction"));

    stockfolio(&db)
        .args(["positions"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AAPL: 10"));
}

#[test]
fn replaying_a_buy_external_id_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stockfolio.db");
    let args = [
        "buy", "-s", "MSFT", "-q", "5", "-p", "300.00", "-d", "2024-02-01", "--external-id", "order-1",
    ];

    let first = stockfolio(&db).args(args).output().unwrap();
    assert!(first.status.success());
    let second = stockfolio(&db).args(args).output().unwrap();
    assert!(second.status.success());
    assert_eq!(
        String::from_utf8_lossy(&first.stdout),
        String::from_utf8_lossy(&second.stdout),
        "replayed external_id must return the original transaction id"
    );

    stockfolio(&db)
        .args(["lots", "-s", "MSFT"])
        .assert()
        .success()
        .stdout(predicate::str::contains("qty=5/5"));
}

#[test]
fn sell_more_than_held_is_a_business_error() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stockfolio.db");

    stockfolio(&db)
        .args(["buy", "-s", "TSLA", "-q", "1", "-p", "200.00", "-d", "2024-03-01"])
        .assert()
        .success();

    stockfolio(&db)
        .args(["sell", "-s", "TSLA", "-q", "5", "-p", "250.00", "-d", "2024-03-05"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("business"));
}

#[test]
fn buy_then_sell_reports_realized_gain_via_sales() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stockfolio.db");

    stockfolio(&db)
        .args(["buy", "-s", "NVDA", "-q", "10", "-p", "100.00", "-d", "2024-01-02"])
        .assert()
        .success();
    stockfolio(&db)
        .args(["sell", "-s", "NVDA", "-q", "4", "-p", "150.00", "-d", "2024-01-10"])
        .assert()
        .success();

    stockfolio(&db)
        .args(["sales"])
        .assert()
        .success()
        .stdout(predicate::str::contains("realized_pnl=200"));
}
