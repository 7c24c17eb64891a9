//! Command implementations behind the `ragchat` binary.
//!
//! Each `run_*` function opens what it needs from the configuration, does one
//! thing, and prints a short human-readable report to stdout.

use std::path::Path;

use anyhow::{Context, Result};

use crate::chat::ChatRequest;
use crate::config::Config;
use crate::db;
use crate::ingest::{ingest_document, Upload};
use crate::keys;
use crate::models::{NewProject, ProjectUpdate};
use crate::server::AppState;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::websearch::WebSearchGateway;

async fn open_store(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

pub async fn run_chat(
    config: &Config,
    user_id: &str,
    session_id: Option<String>,
    project_id: Option<String>,
    web_search: bool,
    message: &str,
) -> Result<()> {
    let state = AppState::from_config(config).await?;
    let resp = state
        .chat
        .handle(ChatRequest {
            message: Some(message.to_string()),
            user_id: Some(user_id.to_string()),
            session_id,
            project_id,
            web_search_enabled: Some(web_search),
        })
        .await?;

    println!("{}", resp.message);
    println!();
    println!("session: {}", resp.session_id);
    if let Some(sources) = &resp.sources {
        for (i, s) in sources.iter().enumerate() {
            println!("  [Source {}] {} (rank {:.3})", i + 1, s.filename, s.rank);
        }
    }
    if let Some(web) = &resp.web_sources {
        for (i, r) in web.iter().enumerate() {
            println!("  [{}] {} <{}>", i + 1, r.title, r.url);
        }
    }
    Ok(())
}

pub async fn run_search(config: &Config, query: &str) -> Result<()> {
    let gateway = WebSearchGateway::from_config(&config.search)?;
    let results = gateway.search(query).await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!("{}. {}", i + 1, r.title);
        println!("    url: {}", r.url);
        if !r.snippet.is_empty() {
            println!("    {}", r.snippet);
        }
    }
    Ok(())
}

pub async fn run_project_create(
    config: &Config,
    user_id: &str,
    name: &str,
    system_prompt: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let store = open_store(config).await?;
    let project = store
        .create_project(&NewProject {
            user_id: user_id.to_string(),
            name: name.to_string(),
            icon: None,
            description,
            system_prompt,
        })
        .await?;
    println!("{}", project.id);
    Ok(())
}

pub async fn run_project_list(config: &Config, user_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let projects = store.list_projects(user_id).await?;
    if projects.is_empty() {
        println!("No projects.");
    }
    for p in projects {
        let docs = store.project_documents(&p.id, user_id).await?;
        println!("{}  {} {}  ({} documents)", p.id, p.icon, p.name, docs.len());
    }
    Ok(())
}

pub async fn run_project_update(
    config: &Config,
    user_id: &str,
    id: &str,
    changes: ProjectUpdate,
) -> Result<()> {
    if changes == ProjectUpdate::default() {
        anyhow::bail!("nothing to update");
    }
    let store = open_store(config).await?;
    let project = store
        .update_project(id, user_id, &changes)
        .await?
        .with_context(|| format!("project not found: {}", id))?;
    println!("updated {}", project.id);
    Ok(())
}

pub async fn run_project_delete(config: &Config, user_id: &str, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    if !store.delete_project(id, user_id).await? {
        anyhow::bail!("project not found: {}", id);
    }
    println!("deleted {}", id);
    Ok(())
}

pub async fn run_ingest(config: &Config, user_id: &str, project_id: &str, path: &Path) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Not a file path: {}", path.display()))?
        .to_string();

    let store = open_store(config).await?;
    let doc = ingest_document(
        &store,
        config.chunking.chunk_chars,
        Upload {
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            filename,
            bytes,
        },
    )
    .await?;

    println!("ingested {}", doc.original_filename);
    println!("  document: {}", doc.id);
    println!("  chunks: {}", doc.chunk_count);
    Ok(())
}

pub async fn run_keys_create(config: &Config, user_id: &str, name: &str) -> Result<()> {
    let store = open_store(config).await?;
    let issued = keys::issue_key(&store, user_id, name).await?;
    println!("{}", issued.key);
    eprintln!("Store this key now; it will not be shown again (id {}).", issued.id);
    Ok(())
}

pub async fn run_keys_list(config: &Config, user_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let listed = keys::list_keys(&store, user_id).await?;
    if listed.is_empty() {
        println!("No keys.");
    }
    for k in listed {
        let last_used = k
            .last_used
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!("{}  {}  {}  last used: {}", k.id, k.name, k.key, last_used);
    }
    Ok(())
}

pub async fn run_keys_revoke(config: &Config, user_id: &str, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    keys::revoke_key(&store, id, user_id).await?;
    println!("revoked {}", id);
    Ok(())
}
