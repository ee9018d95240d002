use crate::auth::TokenManager;
use crate::cli::{Cli, Command};
use crate::config::AppDefaults;
use crate::credentials::CredentialStore;
use crate::gmail::GmailClient;
use crate::pipeline::SyncEngine;
use crate::storage::{default_data_dir, Database};
use crate::summarize::Summarizer;
use crate::types::EmailRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

pub async fn run(cli: Cli) -> Result<()> {
    let defaults = AppDefaults::load()?;
    let data_dir = default_data_dir()?;
    let db = Database::new_default().await?;
    info!(path = %db.path().display(), "Using SQLite store");

    let store = CredentialStore::new(&data_dir);
    let tokens = TokenManager::new(store).context("configuring OAuth client")?;

    match cli.command {
        Some(Command::Login) => {
            let cred = tokens.login().await?;
            let profile = tokens.fetch_user_profile(&cred.access_token).await?;
            println!("Signed in as {}", profile.email);
            Ok(())
        }
        Some(Command::Sync { max_results }) => {
            let mut defaults = defaults;
            if let Some(max) = max_results {
                defaults.max_results = max;
            }
            sync(&tokens, &db, &defaults).await
        }
        Some(Command::List { trash }) => {
            let user_id = current_user(&tokens).await?;
            let emails = if trash {
                db.list_trashed(&user_id).await?
            } else {
                db.list_inbox(&user_id).await?
            };
            render_emails(&emails, trash);
            Ok(())
        }
        Some(Command::Read { email_id, unread }) => {
            let updated = db.set_read(&email_id, !unread).await?;
            report_update(updated, &email_id);
            Ok(())
        }
        Some(Command::Trash { email_id }) => {
            let user_id = current_user(&tokens).await?;
            let updated = db.move_to_trash(&email_id, &user_id).await?;
            report_update(updated, &email_id);
            Ok(())
        }
        Some(Command::Restore { email_id }) => {
            let user_id = current_user(&tokens).await?;
            let updated = db.restore_from_trash(&email_id, &user_id).await?;
            report_update(updated, &email_id);
            Ok(())
        }
        Some(Command::Purge { email_id }) => {
            let user_id = current_user(&tokens).await?;
            let updated = db.purge(&email_id, &user_id).await?;
            report_update(updated, &email_id);
            Ok(())
        }
        Some(Command::EmptyTrash) => {
            let user_id = current_user(&tokens).await?;
            let deleted = db.empty_trash(&user_id).await?;
            println!("{deleted} emails permanently deleted from trash");
            Ok(())
        }
        None => {
            sync(&tokens, &db, &defaults).await?;
            let user_id = current_user(&tokens).await?;
            let emails = db.list_inbox(&user_id).await?;
            render_emails(&emails, false);
            Ok(())
        }
    }
}

async fn sync(tokens: &TokenManager, db: &Database, defaults: &AppDefaults) -> Result<()> {
    let user_id = current_user(tokens).await?;
    let gmail = GmailClient::new();
    let summarizer = Summarizer::new(&defaults.model, defaults.summary_timeout_secs)?;

    let engine = SyncEngine::new(tokens, &gmail, &summarizer, db);
    let report = engine.run(&user_id, defaults).await?;
    println!(
        "Processed {} messages ({} fetched, {} newly stored)",
        report.summarized, report.fetched, report.inserted
    );
    Ok(())
}

/// Resolve the owning user for stored rows from the active credential.
async fn current_user(tokens: &TokenManager) -> Result<String> {
    let cred = tokens.ensure_valid().await?;
    let profile = tokens.fetch_user_profile(&cred.access_token).await?;
    Ok(profile.email)
}

fn report_update(updated: bool, email_id: &str) {
    if updated {
        println!("Updated {email_id}");
    } else {
        println!("No email matched {email_id}");
    }
}

fn render_emails(emails: &[EmailRecord], trash: bool) {
    if emails.is_empty() {
        println!("No {} emails stored.", if trash { "trashed" } else { "inbox" });
        return;
    }

    for (i, email) in emails.iter().enumerate() {
        let date = DateTime::<Utc>::from_timestamp(email.date, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let status = if email.read { "R" } else { "U" };

        println!("{}. [{}] [{}] {}", i + 1, date, status, email.subject);
        println!("   From: {}", email.from_email);
        println!("   Id:   {}", email.email_id);
        for line in email.summary.lines() {
            println!("   {line}");
        }
        println!();
    }
}
