use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tracing::{info, warn};

use lds_client::ldap::{DerefAliases, MessageParams, MsgSearch, SearchScope};
use lds_client::{filter, LdapConfig, LdapConnection};

#[derive(Parser)]
#[command(name = "lds-client")]
#[command(about = "Runs a search against an LDAP server")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server URL (overrides config; e.g. ldap://127.0.0.1:389)
    #[arg(short = 'H', long, value_name = "URL")]
    url: Option<String>,

    /// Bind DN; anonymous when omitted
    #[arg(short = 'D', long)]
    bind_dn: Option<String>,

    /// Bind password
    #[arg(short = 'w', long, default_value = "")]
    password: String,

    /// Search base
    #[arg(short, long, default_value = "")]
    base: String,

    /// Search filter
    #[arg(default_value = "(objectClass=*)")]
    filter: String,

    /// Attributes to return
    attributes: Vec<String>,

    /// Print entries as they arrive instead of collecting them (no referral chasing)
    #[arg(long)]
    stream: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("lds_client={},info", log_level))
        .init();

    let mut config = match &args.config {
        Some(path) => LdapConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LdapConfig::default(),
    };
    if let Some(url) = args.url {
        config.url = url;
    }

    info!(url = %config.url, "connecting");
    let client = LdapConnection::connect(config).await.context("connect")?;
    let mut notices = client.subscribe_unsolicited();
    tokio::spawn(async move {
        while let Some(msg) = notices.recv().await {
            warn!(?msg, "unsolicited message");
        }
    });

    if let Some(dn) = &args.bind_dn {
        client.simple_bind(dn, &args.password).await.context("bind")?;
        info!(state = ?client.bind_state(), "bound");
    }
    let attributes: Vec<&str> = args.attributes.iter().map(String::as_str).collect();

    if args.stream {
        let req = MsgSearch {
            base_object: args.base.clone(),
            scope: SearchScope::WholeSubtree,
            deref: DerefAliases::NeverDerefAliases,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: filter::parse(&args.filter)?,
            attributes: args.attributes.clone(),
        };
        let mut responses = Box::pin(client.search_stream(req, vec![]).await?);
        while let Some(msg) = responses.next().await {
            match msg?.params {
                MessageParams::SearchResultEntry(e) => print_entry(&e),
                MessageParams::SearchResultReference(urls) => println!("# reference {:?}", urls),
                MessageParams::SearchResultDone(r) => println!("# result: {}", r.code),
                other => println!("# {:?}", other.message_type()),
            }
        }
    } else {
        let results = client
            .search(&args.base, SearchScope::WholeSubtree, &args.filter, &attributes)
            .await
            .context("search")?;
        for e in &results.entries {
            print_entry(e);
        }
        for r in &results.references {
            println!("# reference {}", r);
        }
        println!("# {} entries, result: {}", results.entries.len(), results.result.code);
    }

    client.unbind().await.ok();
    Ok(())
}

fn print_entry(e: &lds_client::ldap::MsgSearchResultEntry) {
    println!("dn: {}", e.name);
    for a in &e.attributes {
        for v in a.values_lossy() {
            println!("{}: {}", a.name, v);
        }
    }
    println!();
}
