//! # FbMiner: Messenger customer mining client
//!
//! Browse page conversations, manage message sets and customer groups,
//! dispatch message sets to selected customers and manage schedules.
//!
//! Usage:
//!   fbminer pages                                   # List connected pages
//!   fbminer conversations <page> --disappear 7d     # Filtered conversation table
//!   fbminer dispatch <page> --sets 3,1 --all        # Send sets to every displayed row
//!   fbminer watch <page>                            # Follow new/updated customers
//!   fbminer schedule create <page> --groups 2 --at "2026-11-01 09:00" --set 4

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use fbminer_client::{
    CachedCatalog, ChangeWatcher, ConversationBoard, ConversationChange, ConversationFilter,
    DisappearWindow, HttpBackend,
};
use fbminer_core::config::{MinerConfig, WatchMode};
use fbminer_core::traits::Catalog;
use fbminer_core::types::{
    Conversation, GroupDraft, InactivityUnit, MessageKind, NewSetMessage, RepeatType, ScheduleMessage,
};
use fbminer_scheduler::{ClientStore, Dispatcher, Handoff, NotifyRouter, ScheduleDraft};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fbminer", version, about = "⛏️ FbMiner: Messenger customer mining client")]
struct Cli {
    /// Config file (default ~/.fbminer/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the backend base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// List connected pages
    Pages,
    /// Print the URL that starts the page connection flow
    ConnectUrl,
    /// Show the conversation table of a page
    Conversations {
        page: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Show the message history of one conversation instead
        #[arg(long)]
        history: Option<String>,
    },
    /// Message sets
    Sets {
        #[command(subcommand)]
        action: SetAction,
    },
    /// Messages inside a set
    Messages {
        #[command(subcommand)]
        action: MessageAction,
    },
    /// Customer groups
    Groups {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Send message sets to selected conversations
    Dispatch {
        page: String,
        /// Message set ids, sent in this order
        #[arg(long, value_delimiter = ',', required = true)]
        sets: Vec<i64>,
        /// Conversation ids to select
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,
        /// Select every row that passes the filters
        #[arg(long)]
        all: bool,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Message schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Follow new and updated customers of a page
    Watch {
        page: String,
        /// Re-fetch instead of listening for push events
        #[arg(long)]
        poll: bool,
    },
    /// Customer statistics of a page
    Stats { page: String },
    /// Ask the backend to resync customers from Messenger
    Sync { page: String },
    /// Newly arrived customers
    NewUsers { page: String },
    /// Report every customer's inactivity to the backend
    Inactivity { page: String },
    /// Remaining dispatch quota for today
    Quota,
}

#[derive(clap::Args, Default)]
struct FilterArgs {
    /// Last activity window: 1d, 3d, 7d, 1m, 3m, 6m, 1y, over1y
    #[arg(long)]
    disappear: Option<DisappearWindow>,
    #[arg(long)]
    customer_type: Option<String>,
    #[arg(long)]
    platform: Option<String>,
    /// Mining status (`not_mined` matches customers without one)
    #[arg(long)]
    mining_status: Option<String>,
    /// First interaction on or after (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// First interaction on or before (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// First interaction on exactly this day
    #[arg(long)]
    entered: Option<NaiveDate>,
}

impl FilterArgs {
    fn into_filter(self) -> ConversationFilter {
        ConversationFilter {
            disappear: self.disappear,
            customer_type: self.customer_type,
            platform: self.platform,
            mining_status: self.mining_status,
            start_date: self.from,
            end_date: self.to,
            entry_date: self.entered,
        }
    }
}

#[derive(Subcommand)]
enum SetAction {
    List { page: String },
    Create { page: String, name: String },
    Rename { id: i64, name: String },
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum MessageAction {
    /// Messages of a set in send order
    List { set: i64 },
    /// Append a text message
    Add {
        set: i64,
        page: String,
        text: String,
        #[arg(long)]
        order: Option<i64>,
    },
    /// Upload an image or video file into a set
    Upload {
        set: i64,
        page: String,
        file: PathBuf,
        /// image or video
        #[arg(long, default_value = "image")]
        kind: MessageKind,
        #[arg(long)]
        order: Option<i64>,
    },
    /// Replace the content of a message
    Edit {
        id: i64,
        text: String,
        #[arg(long, default_value = "text")]
        kind: MessageKind,
        #[arg(long, default_value_t = 0)]
        order: i64,
    },
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum GroupAction {
    List {
        page: String,
        #[arg(long)]
        inactive: bool,
    },
    Create {
        page: String,
        name: String,
        #[arg(long, default_value = "")]
        rule: String,
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
    },
    Delete {
        id: i64,
        /// Remove permanently instead of deactivating
        #[arg(long)]
        hard: bool,
    },
    /// Show the messages attached to a group
    Messages { page: String, group: i64 },
    /// Open the schedule editor for these groups next time
    Handoff {
        page: String,
        #[arg(value_delimiter = ',')]
        groups: Vec<i64>,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Build, validate and submit a schedule (one per group)
    Create {
        page: String,
        #[arg(long, value_delimiter = ',')]
        groups: Vec<i64>,
        /// "YYYY-MM-DD HH:MM" local time
        #[arg(long, conflicts_with = "inactive")]
        at: Option<String>,
        /// Inactivity period, e.g. "3 days"
        #[arg(long)]
        inactive: Option<String>,
        /// once, daily, weekly or monthly
        #[arg(long, default_value = "once")]
        repeat: RepeatType,
        /// Weekdays for weekly repeats, 0 = Sunday
        #[arg(long, value_delimiter = ',')]
        days: Vec<u8>,
        #[arg(long)]
        until: Option<NaiveDate>,
        /// Take the messages from this message set
        #[arg(long)]
        set: Option<i64>,
        /// Text messages, in order
        #[arg(long)]
        text: Vec<String>,
        /// Only validate and describe, keep the draft locally
        #[arg(long)]
        draft: bool,
    },
    List { page: String, group: i64 },
    Active { page: String },
    Activate { page: String, group: i64, id: i64 },
    Deactivate { page: String, id: i64 },
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "fbminer=debug,fbminer_client=debug,fbminer_scheduler=debug"
    } else {
        "fbminer=info,fbminer_client=info,fbminer_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .clone()
        .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()))
        .unwrap_or_else(MinerConfig::default_path);

    if let Command::Init { force } = cli.command {
        if config_path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", config_path.display());
        }
        MinerConfig::default().save_to(&config_path)?;
        println!("✅ Wrote {}", config_path.display());
        return Ok(());
    }

    let mut config = if config_path.exists() {
        MinerConfig::load_from(&config_path)?
    } else {
        MinerConfig::default()
    };
    if let Some(url) = cli.base_url {
        config.backend.base_url = url;
    }
    let backend = HttpBackend::new(&config.backend)?;
    tracing::debug!("Backend: {}", backend.base_url());

    match cli.command {
        Command::Init { .. } => {}
        Command::Pages => {
            let pages = backend.pages().await?;
            if pages.is_empty() {
                println!("No pages connected. Connect one at {}", backend.connect_url());
            }
            for page in pages {
                println!("{}\t{}", page.id, page.name);
            }
        }
        Command::ConnectUrl => println!("{}", backend.connect_url()),
        Command::Conversations { page, filter, history } => {
            if let Some(conversation_id) = history {
                for message in backend.conversation_history(&page, &conversation_id).await? {
                    println!("{}", serde_json::to_string(&message)?);
                }
                return Ok(());
            }
            let board = load_board(&backend, &page, filter.into_filter()).await?;
            let now = Utc::now();
            let rows = board.displayed_at(now);
            println!("{} of {} conversation(s)", rows.len(), board.all().len());
            for conv in rows {
                print_row(conv);
            }
        }
        Command::Sets { action } => sets(&backend, &config, action).await?,
        Command::Messages { action } => messages(&backend, &config, action).await?,
        Command::Groups { action } => groups(&backend, &config, action).await?,
        Command::Dispatch { page, sets, select, all, filter } => {
            let mut board = load_board(&backend, &page, filter.into_filter()).await?;
            if all {
                board.select_displayed();
            }
            for id in &select {
                board.select(id);
            }
            if board.selected().is_empty() {
                bail!("Nothing selected (use --select or --all)");
            }

            let mut store = ClientStore::open_configured(&config.store)?;
            let notify = Arc::new(NotifyRouter::new());
            let dispatcher = Dispatcher::new(Arc::new(backend.clone()), &config.dispatch, notify.clone())?;

            let mut progress = dispatcher.progress();
            let reporter = tokio::spawn(async move {
                while progress.changed().await.is_ok() {
                    let p = progress.borrow_and_update().clone();
                    if p.running {
                        tracing::info!(
                            "⏳ {}/{} conversations, {} sent, {} failed",
                            p.conversations_done,
                            p.conversations_total,
                            p.messages_sent,
                            p.messages_failed
                        );
                    }
                }
            });

            let report = dispatcher.run(&mut board, &sets, &mut store).await;
            drop(dispatcher);
            reporter.await.ok();
            for notice in notify.history() {
                println!("{}", notice.render());
            }
            let report = report?;
            let today = Local::now().date_naive();
            let quota = fbminer_scheduler::DailyQuota::new(config.dispatch.daily_limit);
            println!(
                "Contacted {} customer(s); {} left today",
                report.contacted_psids.len(),
                quota.remaining(&store.state().quota, today)
            );
            if !report.contacted_psids.is_empty() && !report.status_recorded {
                println!("Mining status was not saved; those conversations stay unmarked");
            }
        }
        Command::Schedule { action } => schedule(&backend, &config, action).await?,
        Command::Watch { page, poll } => {
            let mut watch_config = config.watch.clone();
            if poll {
                watch_config.mode = WatchMode::Poll;
            }
            let catalog = Arc::new(backend.clone());
            let (handle, mut changes) = ChangeWatcher::start(catalog, backend.base_url(), &watch_config, &page);
            let (users_task, mut new_users) = ChangeWatcher::new_users(
                Arc::new(backend.clone()),
                &page,
                Duration::from_secs(watch_config.poll_interval_secs.max(1)),
            );
            println!("👀 Watching page {} (Ctrl+C to stop)", handle.page_id());
            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Some(ConversationChange::New(conv)) => {
                            print!("🆕 ");
                            print_row(&conv);
                        }
                        Some(ConversationChange::Updated(conv)) => {
                            print!("🔄 ");
                            print_row(&conv);
                        }
                        None => {
                            tracing::warn!("Watcher stopped");
                            break;
                        }
                    },
                    Some(users) = new_users.recv() => {
                        for user in users {
                            println!("🔔 New customer: {}", user.user_name);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            users_task.abort();
            handle.stop();
        }
        Command::Stats { page } => {
            let stats = backend.customer_statistics(&page).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Sync { page } => {
            let report = backend.sync_customers(&page).await?;
            println!("✅ {} synced, {} error(s) {}", report.synced, report.errors, report.message);
        }
        Command::NewUsers { page } => {
            for user in backend.new_user_notifications(&page).await? {
                println!("{}\t{}", user.user_id.unwrap_or_default(), user.user_name);
            }
        }
        Command::Inactivity { page } => {
            let board = load_board(&backend, &page, ConversationFilter::default()).await?;
            let batch = board.inactivity_batch(Utc::now());
            let updated = backend.update_inactivity(&page, &batch).await?;
            println!("✅ Reported inactivity for {updated} customer(s)");
        }
        Command::Quota => {
            let store = ClientStore::open_configured(&config.store)?;
            let quota = fbminer_scheduler::DailyQuota::new(config.dispatch.daily_limit);
            let today = Local::now().date_naive();
            println!(
                "{} of {} used today, {} left",
                quota.used(&store.state().quota, today),
                quota.limit(),
                quota.remaining(&store.state().quota, today)
            );
        }
    }

    Ok(())
}

/// Fetch conversations and mining statuses into a filtered board.
async fn load_board(backend: &HttpBackend, page: &str, filter: ConversationFilter) -> Result<ConversationBoard> {
    let mut board = ConversationBoard::new();
    board.load(page, backend.list_conversations(page).await?);
    match backend.mining_statuses(page).await {
        Ok(statuses) => board.apply_mining_statuses(&statuses),
        Err(e) => tracing::warn!("⚠️ Mining statuses unavailable: {e}"),
    }
    board.set_filter(filter);
    Ok(board)
}

fn print_row(conv: &Conversation) {
    println!(
        "{}\t{}\t{}\t{}\t{}",
        conv.conversation_id,
        conv.name,
        conv.raw_psid.as_deref().unwrap_or("-"),
        conv.last_activity().map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into()),
        conv.mining_status.as_deref().unwrap_or(fbminer_client::selection::NOT_MINED),
    );
}

async fn sets(backend: &HttpBackend, config: &MinerConfig, action: SetAction) -> Result<()> {
    let catalog = CachedCatalog::new(backend.clone(), &config.cache);
    match action {
        SetAction::List { page } => {
            for set in catalog.list_message_sets(&page).await? {
                println!("{}\t{}", set.id, set.set_name);
            }
        }
        SetAction::Create { page, name } => {
            let set = catalog.create_message_set(&page, &name).await?;
            println!("✅ Created set {} '{}'", set.id, set.set_name);
        }
        SetAction::Rename { id, name } => {
            let set = catalog.rename_message_set(id, &name).await?;
            println!("✅ Renamed set {} to '{}'", set.id, set.set_name);
        }
        SetAction::Delete { id } => {
            catalog.delete_message_set(id).await?;
            println!("🗑️ Deleted set {id}");
        }
    }
    Ok(())
}

async fn messages(backend: &HttpBackend, config: &MinerConfig, action: MessageAction) -> Result<()> {
    let catalog = CachedCatalog::new(backend.clone(), &config.cache);
    match action {
        MessageAction::List { set } => {
            let mut messages = catalog.list_set_messages(set).await?;
            messages.sort_by_key(|m| m.display_order);
            for m in messages {
                println!("{}\t{}\t{}\t{}", m.id, m.display_order, m.message_type, m.content);
            }
        }
        MessageAction::Add { set, page, text, order } => {
            let order = match order {
                Some(order) => order,
                None => next_order(&catalog, set).await?,
            };
            let message = catalog
                .create_set_message(&NewSetMessage {
                    message_set_id: set,
                    page_id: page,
                    message_type: MessageKind::Text,
                    content: text,
                    display_order: order,
                    image_data_base64: None,
                })
                .await?;
            println!("✅ Added message {} at position {}", message.id, message.display_order);
        }
        MessageAction::Upload { set, page, file, kind, order } => {
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("file has no name")?;
            let order = match order {
                Some(order) => order,
                None => next_order(&catalog, set).await?,
            };
            let message = catalog.upload_media(set, &page, kind, &name, &bytes, order).await?;
            println!("✅ Uploaded {} as message {}", name, message.id);
        }
        MessageAction::Edit { id, text, kind, order } => {
            let message = catalog.update_set_message(id, kind, &text, order).await?;
            println!("✅ Updated message {} in set {}", message.id, message.message_set_id);
        }
        MessageAction::Delete { id } => {
            catalog.delete_set_message(id).await?;
            println!("🗑️ Deleted message {id}");
        }
    }
    Ok(())
}

async fn next_order(catalog: &impl Catalog, set: i64) -> Result<i64> {
    let messages = catalog.list_set_messages(set).await?;
    Ok(messages.iter().map(|m| m.display_order + 1).max().unwrap_or(0))
}

async fn groups(backend: &HttpBackend, config: &MinerConfig, action: GroupAction) -> Result<()> {
    match action {
        GroupAction::List { page, inactive } => {
            for group in backend.list_groups(&page, inactive).await? {
                println!("{}", serde_json::to_string(&group)?);
            }
        }
        GroupAction::Create { page, name, rule, keywords } => {
            backend
                .create_group(&GroupDraft {
                    page_id: Some(page),
                    name: name.clone(),
                    rule_description: rule,
                    keywords,
                    ..Default::default()
                })
                .await?;
            println!("✅ Group '{name}' submitted");
        }
        GroupAction::Delete { id, hard } => {
            backend.delete_group(id, hard).await?;
            println!("🗑️ Group {id} {}", if hard { "deleted" } else { "deactivated" });
        }
        GroupAction::Messages { page, group } => {
            let messages = backend.group_messages(&page, group).await?;
            let mut store = ClientStore::open_configured(&config.store)?;
            let key = fbminer_scheduler::ClientState::group_messages_key(&page, group);
            store.update(|s| s.group_messages.insert(key, messages.clone()))?;
            for m in messages {
                println!("{}\t{}\t{}", m.display_order, m.message_type, m.content);
            }
        }
        GroupAction::Handoff { page, groups } => {
            let mut store = ClientStore::open_configured(&config.store)?;
            store.update(|s| {
                s.handoff = Some(Handoff {
                    page_id: Some(page),
                    selected_groups: groups,
                    editing_schedule_id: None,
                    editing: false,
                })
            })?;
            println!("✅ Groups handed to the schedule editor");
        }
    }
    Ok(())
}

async fn schedule(backend: &HttpBackend, config: &MinerConfig, action: ScheduleAction) -> Result<()> {
    match action {
        ScheduleAction::Create { page, mut groups, at, inactive, repeat, days, until, set, text, draft } => {
            let mut store = ClientStore::open_configured(&config.store)?;
            if groups.is_empty() {
                if let Some(handoff) = store.take_handoff()? {
                    if handoff.page_id.as_deref() == Some(page.as_str()) {
                        groups = handoff.selected_groups;
                    }
                }
            }

            let mut builder = match (at, inactive) {
                (Some(at), _) => {
                    let when = NaiveDateTime::parse_from_str(&at, "%Y-%m-%d %H:%M")
                        .with_context(|| format!("invalid --at '{at}', expected YYYY-MM-DD HH:MM"))?;
                    ScheduleDraft::at(&page, when.date(), when.time())
                }
                (None, Some(inactive)) => {
                    let (period, unit) = parse_period(&inactive)?;
                    ScheduleDraft::after_inactivity(&page, period, unit)
                }
                (None, None) => ScheduleDraft::immediate(&page),
            }
            .repeat(repeat)
            .on_days(&days)
            .for_groups(&groups);
            if let Some(until) = until {
                builder = builder.until(until);
            }

            let mut messages: Vec<ScheduleMessage> = Vec::new();
            if let Some(set) = set {
                let mut from_set = backend.list_set_messages(set).await?;
                from_set.sort_by_key(|m| m.display_order);
                messages.extend(from_set.into_iter().map(|m| ScheduleMessage {
                    message_type: m.message_type,
                    content: m.content,
                    display_order: m.display_order,
                }));
            }
            let offset = messages.len() as i64;
            messages.extend(text.into_iter().enumerate().map(|(i, content)| ScheduleMessage {
                message_type: MessageKind::Text,
                content,
                display_order: offset + i as i64,
            }));
            let draft_schedule = builder.with_messages(messages);

            draft_schedule.validate(Local::now().naive_local())?;
            println!("📅 {}", draft_schedule.summary());
            if let Some(next) = draft_schedule.next_run_after(Local::now().naive_local()) {
                println!("   next run: {next}");
            }

            if draft {
                store.update(|s| {
                    s.schedule_drafts
                        .entry(page.clone())
                        .or_default()
                        .push(draft_schedule.clone())
                })?;
                println!("💾 Draft saved");
                return Ok(());
            }
            let created = backend.create_schedules_batch(&draft_schedule.into_requests()).await?;
            println!("✅ Created {} schedule(s)", created.len());
        }
        ScheduleAction::List { page, group } => {
            for s in backend.group_schedules(&page, group).await? {
                println!(
                    "{}\t{:?}\t{}\t{}",
                    s.id,
                    s.schedule_type,
                    if s.is_active { "active" } else { "inactive" },
                    s.next_run_at.unwrap_or_default()
                );
            }
        }
        ScheduleAction::Active { page } => {
            for s in backend.active_schedules(&page).await? {
                println!("{s}");
            }
        }
        ScheduleAction::Activate { page, group, id } => {
            let schedules = backend.group_schedules(&page, group).await?;
            let Some(schedule) = schedules.iter().find(|s| s.id == id) else {
                bail!("Schedule {id} not found in group {group}");
            };
            println!("✅ {}", backend.activate_schedule(&page, schedule).await?);
        }
        ScheduleAction::Deactivate { page, id } => {
            println!("✅ {}", backend.deactivate_schedule(&page, id).await?);
        }
        ScheduleAction::Delete { id } => {
            backend.delete_schedule(id).await?;
            println!("🗑️ Deleted schedule {id}");
        }
    }
    Ok(())
}

/// "3 days" / "12 hours" → (3, Days).
fn parse_period(s: &str) -> Result<(u32, InactivityUnit)> {
    let mut parts = s.split_whitespace();
    let period: u32 = parts
        .next()
        .context("empty inactivity period")?
        .parse()
        .with_context(|| format!("invalid inactivity period '{s}'"))?;
    let unit = match parts.next() {
        Some(unit) => unit.parse::<InactivityUnit>().map_err(anyhow::Error::msg)?,
        None => InactivityUnit::Days,
    };
    Ok((period, unit))
}
