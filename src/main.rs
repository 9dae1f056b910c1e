use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use postfeed::api::{HttpApi, MockApi, PageRequest, PostsApi};
use postfeed::config::Config;
use postfeed::model::{
    AuthorType, Channel, ChannelCreate, ChannelUpdate, Feed, FeedUpdate, PaginatedResponse, Post,
    TagSummary, ALL_FEED_ID,
};
use postfeed::notify::{Notification, Notifier};
use postfeed::query::QueryClient;
use postfeed::search::{debounced, SEARCH_DEBOUNCE};
use postfeed::selection::{PagedView, SelectionStore};
use postfeed::util::{single_line, truncate_to_width};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

/// Width listings are truncated to.
const LINE_WIDTH: usize = 100;

/// Get the default config file path (~/.config/postfeed/config.toml)
fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("postfeed")
            .join("config.toml"),
    )
}

#[derive(Parser, Debug)]
#[command(
    name = "postfeed",
    about = "Browse, tag and bookmark channel posts from the posts API"
)]
struct Args {
    /// Config file (default: ~/.config/postfeed/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Use the built-in sample backend
    #[arg(long, global = true)]
    mock: bool,

    /// Override the API base URL
    #[arg(long, value_name = "URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List posts for a feed or tag selection
    Posts {
        /// Feed id
        #[arg(long)]
        feed: Option<String>,
        /// Tag filter (repeatable, matches any)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Show one post
    Post { id: String },
    /// List bookmarked posts
    Bookmarks {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Add, remove or toggle a bookmark
    Bookmark {
        #[command(subcommand)]
        action: BookmarkAction,
    },
    /// Search posts; without a query, read queries from stdin as they are typed
    Search {
        query: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// List tags with usage counts
    Tags,
    /// Create or delete a tag
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
    /// Replace the tags of a post
    TagPost { id: String, names: Vec<String> },
    /// List feeds
    Feeds,
    /// Create, update or delete a feed
    Feed {
        #[command(subcommand)]
        action: FeedAction,
    },
    /// List channels
    Channels,
    /// Add, update or remove a channel
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },
}

#[derive(Subcommand, Debug)]
enum BookmarkAction {
    Add { id: String },
    Remove { id: String },
    Toggle { id: String },
}

#[derive(Subcommand, Debug)]
enum TagAction {
    Create {
        name: String,
        /// Mark the tag as machine-generated
        #[arg(long)]
        llm: bool,
    },
    Delete {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum FeedAction {
    Create {
        name: String,
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        /// Replace the tag filters (repeatable)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Remove all tag filters
        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ChannelAction {
    Add {
        username: String,
        #[arg(long)]
        name: Option<String>,
        /// Add the channel without activating ingestion
        #[arg(long)]
        inactive: bool,
    },
    Update {
        username: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    Remove {
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = match &config_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let mut config = Config::default();
            config.apply_env(|name| std::env::var(name).ok());
            config
        }
    };
    if args.mock {
        config.use_mock_data = true;
    }
    if let Some(url) = &args.api_url {
        config.api_url = url.clone();
    }
    config.validate().context("Invalid configuration")?;

    let api: Arc<dyn PostsApi> = if config.use_mock_data {
        tracing::info!("Using sample data");
        Arc::new(MockApi::with_sample_data())
    } else {
        Arc::new(
            HttpApi::new(&config.api_url, Some(config.request_timeout()))
                .context("Failed to create API client")?,
        )
    };

    let (notifier, mut notifications) = Notifier::channel(16);
    let client = QueryClient::new(api, config.client_options()).with_notifier(notifier);

    let outcome = run(&client, &config, args.command).await;
    print_notifications(&mut notifications);
    outcome
}

async fn run(client: &QueryClient, config: &Config, command: Command) -> Result<()> {
    let page = |n: u32| PageRequest::new(n, config.page_size);

    match command {
        Command::Posts {
            feed,
            tags,
            search,
            page: n,
        } => {
            let store = SelectionStore::default();
            store.set_current_feed(feed.unwrap_or_else(|| ALL_FEED_ID.to_string()));
            store.set_selected_tags(tags.as_slice());
            let mut view = PagedView::with_limit(&store, config.page_size);
            view.set_page(n);

            let feeds = client.feeds().await.context("Failed to load feeds")?;
            let (selection, page_request) = view.current();
            let mut query = selection.post_query(&feeds, page_request);
            query.search = search.filter(|s| !s.trim().is_empty());

            let posts = client.posts(&query).await.context("Failed to load posts")?;
            print_posts(&posts, page_request.page);
        }
        Command::Post { id } => {
            let post = client.post(&id).await.context("Failed to load post")?;
            print_post_detail(&post);
        }
        Command::Bookmarks { page: n } => {
            let posts = client
                .bookmarks(page(n))
                .await
                .context("Failed to load bookmarks")?;
            print_posts(&posts, n);
        }
        Command::Bookmark { action } => match action {
            BookmarkAction::Add { id } => client.add_bookmark(&id).await?,
            BookmarkAction::Remove { id } => client.remove_bookmark(&id).await?,
            BookmarkAction::Toggle { id } => {
                let post = client.post(&id).await.context("Failed to load post")?;
                client.toggle_bookmark(&post).await?;
            }
        },
        Command::Search {
            query: Some(q),
            page: n,
        } => {
            let posts = client.search(&q, page(n)).await.context("Search failed")?;
            print_posts(&posts, n);
        }
        Command::Search { query: None, .. } => interactive_search(client, page(1)).await?,
        Command::Tags => {
            let tags = client.tags().await.context("Failed to load tags")?;
            print_tags(&tags);
        }
        Command::Tag { action } => match action {
            TagAction::Create { name, llm } => {
                let author_type = if llm {
                    AuthorType::Llm
                } else {
                    AuthorType::Human
                };
                let tag = client.create_tag(&name, author_type).await?;
                println!("{} ({})", tag.name, tag.author_type);
            }
            TagAction::Delete { name } => client.delete_tag(&name).await?,
        },
        Command::TagPost { id, names } => {
            let post = client.update_post_tags(&id, names.as_slice()).await?;
            print_post_detail(&post);
        }
        Command::Feeds => {
            let feeds = client.feeds().await.context("Failed to load feeds")?;
            print_feeds(&feeds);
        }
        Command::Feed { action } => match action {
            FeedAction::Create { name, tags } => {
                let feed = client.create_feed(&name, tags.as_slice()).await?;
                print_feeds(std::slice::from_ref(&feed));
            }
            FeedAction::Update {
                id,
                name,
                tags,
                clear_tags,
            } => {
                let tag_filters = if clear_tags {
                    Some(Vec::new())
                } else {
                    Some(tags).filter(|t| !t.is_empty())
                };
                let feed = client
                    .update_feed(&id, FeedUpdate { name, tag_filters })
                    .await?;
                print_feeds(std::slice::from_ref(&feed));
            }
            FeedAction::Delete { id } => client.delete_feed(&id).await?,
        },
        Command::Channels => {
            let channels = client.channels().await.context("Failed to load channels")?;
            print_channels(&channels);
        }
        Command::Channel { action } => match action {
            ChannelAction::Add {
                username,
                name,
                inactive,
            } => {
                let channel = client
                    .add_channel(ChannelCreate {
                        username,
                        name,
                        is_active: !inactive,
                    })
                    .await?;
                print_channels(std::slice::from_ref(&channel));
            }
            ChannelAction::Update {
                username,
                name,
                active,
            } => {
                let channel = client
                    .update_channel(
                        &username,
                        ChannelUpdate {
                            name,
                            is_active: active,
                        },
                    )
                    .await?;
                print_channels(std::slice::from_ref(&channel));
            }
            ChannelAction::Remove { username } => client.remove_channel(&username).await?,
        },
    }
    Ok(())
}

/// Treat each stdin line as the current content of a search box and print
/// results whenever typing settles.
async fn interactive_search(client: &QueryClient, page: PageRequest) -> Result<()> {
    let (input, mut debouncer) = debounced(SEARCH_DEBOUNCE);

    let reader = tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => input.set(line),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read search input");
                    break;
                }
            }
        }
    });

    while let Some(query) = debouncer.next_query().await {
        match client.search(&query, page).await {
            Ok(posts) => {
                println!("== {query}");
                print_posts(&posts, page.page);
            }
            Err(e) => eprintln!("Search failed: {e}"),
        }
    }

    reader.await.context("Search input reader panicked")?;
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_posts(posts: &PaginatedResponse<Post>, page: u32) {
    if posts.data.is_empty() {
        println!("No posts found");
        return;
    }
    for post in &posts.data {
        let marker = if post.is_bookmarked { '*' } else { ' ' };
        let line = format!(
            "{:>6} {} @{:<14} {}",
            post.id,
            marker,
            post.channel_username,
            single_line(&post.content)
        );
        println!("{}", truncate_to_width(&line, LINE_WIDTH));
    }
    let more = if posts.has_more { ", more available" } else { "" };
    println!("-- page {page}, {} total{more}", posts.total);
}

fn print_post_detail(post: &Post) {
    let marker = if post.is_bookmarked { " [bookmarked]" } else { "" };
    println!("{} @{}{}", post.channel_name, post.channel_username, marker);
    println!("{}", post.published_at.format("%Y-%m-%d %H:%M UTC"));
    println!("{}", post.original_url);
    println!();
    println!("{}", post.content);
    if !post.tags.is_empty() {
        let tags: Vec<String> = post
            .tags
            .iter()
            .map(|t| format!("{} ({})", t.name, t.author_type))
            .collect();
        println!();
        println!("tags: {}", tags.join(", "));
    }
}

fn print_tags(tags: &[TagSummary]) {
    for tag in tags {
        println!("{:>5}  {:<24} {}", tag.count, tag.name, tag.source);
    }
}

fn print_feeds(feeds: &[Feed]) {
    for feed in feeds {
        let filters = if feed.tag_filters.is_empty() {
            "(all posts)".to_string()
        } else {
            feed.tag_filters.join(", ")
        };
        let marker = if feed.is_deletable() { ' ' } else { '*' };
        let line = format!("{:>5}{marker} {:<24} {}", feed.id, feed.name, filters);
        println!("{}", truncate_to_width(&line, LINE_WIDTH));
    }
}

fn print_channels(channels: &[Channel]) {
    for channel in channels {
        let state = if channel.is_active { "active" } else { "paused" };
        let line = format!(
            "@{:<20} {:<8} {}",
            channel.username, state, channel.name
        );
        println!("{}", truncate_to_width(&line, LINE_WIDTH));
    }
}

fn print_notifications(rx: &mut mpsc::Receiver<Notification>) {
    while let Ok(notification) = rx.try_recv() {
        eprintln!("{notification}");
    }
}
