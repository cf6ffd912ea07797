//! # Assay Operator Console
//!
//! Headless operator terminal. Reads one command per line from stdin and
//! prints every emitted event as a JSON line on stdout. Logs go to stderr.
//!
//! ```text
//! stdin ──► command ──► Terminal ──► TerminalEventEmitter ──► stdout (JSON)
//!                          │
//!                          └──► tracing ──► stderr
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use assay_core::form::{IronLineInput, OperatorFormState};
use assay_core::workflow::WorkflowView;
use assay_core::{PendingTransaction, Session, Tab};
use assay_terminal::{
    BalanceView, ConnectionState, ErrorNotice, SnapshotStore, Terminal, TerminalBuilder,
    TerminalConfig, TerminalEventEmitter, TerminalResult,
};

const HELP: &str = "\
commands:
  open | close | status | balance
  set <powder|pt|pd|rh|phone|name|notes|currency> <value>
  line <catalog-item> <weight> <price>
  submit | recalc | offer | accept | reject | reset
  attach <phone> | lookup <phone>
  confirm
  tab <catalyst|iron> | tab-confirm | tab-cancel
  iron
  quit";

/// Prints events as JSON lines.
struct StdoutEmitter;

impl StdoutEmitter {
    fn print<T: Serialize>(&self, event: &str, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(json) => println!("{{\"event\":\"{event}\",\"payload\":{json}}}"),
            Err(e) => warn!(%event, error = %e, "Failed to serialize event"),
        }
    }
}

impl TerminalEventEmitter for StdoutEmitter {
    fn emit_session(&self, session: &Session) {
        self.print("session", session);
    }

    fn emit_workflow(&self, view: &WorkflowView) {
        self.print("workflow", view);
    }

    fn emit_pending(&self, pending: Option<&PendingTransaction>) {
        self.print("pending", &pending);
    }

    fn emit_balance(&self, balance: &BalanceView) {
        self.print("balance", balance);
    }

    fn emit_channel(&self, state: ConnectionState) {
        self.print("channel", &state.to_string());
    }

    fn emit_error(&self, notice: &ErrorNotice) {
        self.print("error", notice);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,assay=debug")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = TerminalConfig::load(config_path)?;
    let auth = SnapshotStore::new(config.snapshot_dir()?).load_auth()?;
    info!(cash_register_id = %auth.cash_register_id, shop_id = %auth.shop_id, "Auth snapshot loaded");

    let terminal = TerminalBuilder::new(config, auth)
        .with_emitter(Arc::new(StdoutEmitter))
        .build()?;

    if let Err(e) = terminal.restore().await {
        warn!(error = %e, "Startup restore failed");
    }
    eprintln!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        break;
                    }
                };
                let words: Vec<&str> = line.split_whitespace().collect();
                if words.first() == Some(&"quit") {
                    break;
                }
                // Failures already reached the emitter.
                let _ = run(&terminal, &words).await;
            }
        }
    }

    terminal.shutdown().await;
    Ok(())
}

async fn run(terminal: &Terminal, words: &[&str]) -> TerminalResult<()> {
    match words {
        [] => {}
        ["open"] => {
            terminal.open_session().await?;
        }
        ["close"] => {
            terminal.close_session().await?;
        }
        ["status"] => {
            println!("{}", serde_json::to_string(&terminal.session().await)?);
            println!("{}", serde_json::to_string(&terminal.workflow().await)?);
            println!("{}", serde_json::to_string(&terminal.reference().await)?);
            println!("channel: {}", terminal.channel_state().await);
        }
        ["balance"] => {
            terminal.reveal_balance().await?;
        }
        ["set", field, value @ ..] => {
            let value = value.join(" ");
            let field = field.to_string();
            terminal.edit_form(move |form| set_field(form, &field, value)).await?;
        }
        ["line", item, weight, price] => {
            let line = IronLineInput {
                catalog_item_id: Some(item.to_string()),
                weight: weight.to_string(),
                price: price.to_string(),
            };
            terminal
                .edit_form(move |form| {
                    if let OperatorFormState::Iron(iron) = form {
                        iron.lines.push(line);
                    }
                })
                .await?;
        }
        ["submit"] => {
            terminal.submit_intake().await?;
        }
        ["recalc"] => {
            terminal.recalculate_intake().await?;
        }
        ["offer"] => {
            terminal.offer_intake().await?;
        }
        ["accept"] => {
            terminal.accept_intake().await?;
        }
        ["reject"] => {
            terminal.reject_intake().await?;
        }
        ["reset"] => {
            terminal.reset_workflow().await?;
        }
        ["attach", phone @ ..] => {
            terminal.attach_customer(&phone.join(" ")).await?;
        }
        ["lookup", phone @ ..] => {
            let found = terminal.lookup_customer(&phone.join(" ")).await?;
            println!("{}", serde_json::to_string(&found)?);
        }
        ["confirm"] => {
            terminal.confirm_pending_transaction().await?;
        }
        ["tab", "catalyst"] => {
            println!("{}", serde_json::to_string(&terminal.switch_tab(Tab::Catalyst).await?)?);
        }
        ["tab", "iron"] => {
            println!("{}", serde_json::to_string(&terminal.switch_tab(Tab::Iron).await?)?);
        }
        ["tab-confirm"] => {
            terminal.confirm_tab_switch().await?;
        }
        ["tab-cancel"] => {
            terminal.cancel_tab_switch().await?;
        }
        ["iron"] => {
            let receipt = terminal.submit_iron_purchase().await?;
            println!("{}", serde_json::to_string(&receipt)?);
        }
        _ => eprintln!("{HELP}"),
    }
    Ok(())
}

fn set_field(form: &mut OperatorFormState, field: &str, value: String) {
    match form {
        OperatorFormState::Catalyst(f) => match field {
            "powder" => f.powder_weight_total = value,
            "pt" => f.pt_weight = value,
            "pd" => f.pd_weight = value,
            "rh" => f.rh_weight = value,
            "phone" => f.phone = value,
            "name" => f.full_name = value,
            "notes" => f.notes = value,
            "currency" => f.currency_code = value,
            other => eprintln!("unknown catalyst field: {other}"),
        },
        OperatorFormState::Iron(f) => match field {
            "phone" => f.phone = value,
            other => eprintln!("unknown iron field: {other}"),
        },
    }
}
