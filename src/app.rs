use std::fs;
use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use crate::config;
use crate::html::{self, ImageSize, ImageSizes};
use crate::logging;
use crate::paging::{CountSink, ListingFetcher, PageKey, PageSequencer};
use crate::session::PagingSession;
use crate::v2ex;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    DecodeEmail(String),
    Sanitize { input: String, images: ImageSizes },
    Listing(Listing),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Listing {
    Notifications(PageRange),
    Topics { node: String, range: PageRange },
    Replies { topic_id: u64, range: PageRange },
    MemberTopics { username: String, range: PageRange },
    Search { keyword: String, range: PageRange },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: PageKey,
    pub pages: u32,
}

impl Default for PageRange {
    fn default() -> Self {
        Self {
            start: PageKey::FIRST,
            pages: 1,
        }
    }
}

pub fn parse_args(args: &[String]) -> Result<Command> {
    let (name, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("missing command, see --help"))?;

    match name.as_str() {
        "decode-email" => {
            let [encoded] = rest else {
                bail!("usage: decode-email <hex>");
            };
            Ok(Command::DecodeEmail(encoded.clone()))
        }
        "sanitize" => parse_sanitize(rest),
        "notifications" => Ok(Command::Listing(Listing::Notifications(parse_range(rest)?))),
        "topics" => {
            let (node, rest) = rest
                .split_first()
                .ok_or_else(|| anyhow!("usage: topics <node> [--page N] [--pages N]"))?;
            let node = v2ex::node_name_from_link(node)
                .ok_or_else(|| anyhow!("not a node name or link: {node}"))?;
            Ok(Command::Listing(Listing::Topics {
                node,
                range: parse_range(rest)?,
            }))
        }
        "replies" => {
            let (topic, rest) = rest
                .split_first()
                .ok_or_else(|| anyhow!("usage: replies <topic> [--page N] [--pages N]"))?;
            let topic_id = v2ex::topic_id_from_link(topic)
                .ok_or_else(|| anyhow!("not a topic id or link: {topic}"))?;
            Ok(Command::Listing(Listing::Replies {
                topic_id,
                range: parse_range(rest)?,
            }))
        }
        "member-topics" => {
            let (username, rest) = rest
                .split_first()
                .ok_or_else(|| anyhow!("usage: member-topics <username> [--page N] [--pages N]"))?;
            Ok(Command::Listing(Listing::MemberTopics {
                username: username.trim_start_matches('@').to_string(),
                range: parse_range(rest)?,
            }))
        }
        "search" => {
            let (keyword, rest) = rest
                .split_first()
                .ok_or_else(|| anyhow!("usage: search <keyword> [--page N] [--pages N]"))?;
            Ok(Command::Listing(Listing::Search {
                keyword: keyword.clone(),
                range: parse_range(rest)?,
            }))
        }
        other => bail!("unknown command {other:?}, see --help"),
    }
}

fn parse_sanitize(args: &[String]) -> Result<Command> {
    let mut input = None;
    let mut images = ImageSizes::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--image" {
            let spec = iter
                .next()
                .ok_or_else(|| anyhow!("--image expects SRC=WIDTHxHEIGHT"))?;
            let (src, size) = parse_image_size(spec)?;
            images.insert(src, size);
        } else if input.is_none() {
            input = Some(arg.clone());
        } else {
            bail!("unexpected argument {arg:?}");
        }
    }
    Ok(Command::Sanitize {
        input: input.unwrap_or_else(|| "-".into()),
        images,
    })
}

fn parse_image_size(spec: &str) -> Result<(String, ImageSize)> {
    let (src, dims) = spec
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("image size {spec:?} is not SRC=WIDTHxHEIGHT"))?;
    let (width, height) = dims
        .split_once('x')
        .ok_or_else(|| anyhow!("image size {dims:?} is not WIDTHxHEIGHT"))?;
    let width = width.parse().with_context(|| format!("image width {width:?}"))?;
    let height = height
        .parse()
        .with_context(|| format!("image height {height:?}"))?;
    Ok((src.to_string(), ImageSize::new(width, height)))
}

fn parse_range(args: &[String]) -> Result<PageRange> {
    let mut range = PageRange::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| anyhow!("{arg} expects a number"))?;
        let number: u32 = value
            .parse()
            .with_context(|| format!("{arg} expects a number, got {value:?}"))?;
        match arg.as_str() {
            "--page" => {
                range.start = PageKey::new(number).ok_or_else(|| anyhow!("pages start at 1"))?;
            }
            "--pages" => range.pages = number.max(1),
            _ => bail!("unexpected argument {arg:?}"),
        }
    }
    Ok(range)
}

/// Filter for the offline commands, which never read the config file.
const OFFLINE_LOG_FILTER: &str = "warn";

pub fn run(args: &[String]) -> Result<()> {
    match parse_args(args)? {
        Command::DecodeEmail(encoded) => {
            logging::init(OFFLINE_LOG_FILTER)?;
            let email = html::decode_cloaked_email(&encoded)
                .with_context(|| format!("decode {encoded:?}"))?;
            println!("{email}");
            Ok(())
        }
        Command::Sanitize { input, images } => {
            logging::init(OFFLINE_LOG_FILTER)?;
            let markup = read_input(&input)?;
            print!("{}", html::process(&markup, &images));
            Ok(())
        }
        Command::Listing(listing) => {
            let cfg = config::load(config::LoadOptions::default()).context("load config")?;
            logging::init(&cfg.log.filter)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("start async runtime")?;
            runtime.block_on(run_listing(&cfg, listing))
        }
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("read html from stdin")?;
        Ok(buf)
    } else {
        fs::read_to_string(input).with_context(|| format!("read html from {input}"))
    }
}

async fn run_listing(cfg: &config::Config, listing: Listing) -> Result<()> {
    let client = Arc::new(
        v2ex::Client::new(v2ex::ClientConfig {
            user_agent: cfg.api.user_agent.clone(),
            base_url: Some(cfg.api.base_url.clone()),
            search_url: Some(cfg.api.search_url.clone()),
            token: Some(cfg.api.token.clone()),
            timeout: Some(cfg.api.timeout),
            http_client: None,
        })
        .context("create v2ex client")?,
    );
    let no_images = ImageSizes::new();

    match listing {
        Listing::Notifications(range) => {
            let sequencer = PageSequencer::new(
                "notifications",
                v2ex::NotificationListing::new(client),
                cfg.paging.for_listing("notifications"),
            );
            print_pages(PagingSession::new(sequencer), range, |n: &v2ex::Notification| {
                format!(
                    "{} {}: {}",
                    n.created.format("%Y-%m-%d %H:%M"),
                    n.member.username,
                    html::process(&n.text, &no_images)
                )
            })
            .await?;
        }
        Listing::Topics { node, range } => {
            let sequencer = PageSequencer::new(
                "topics",
                v2ex::NodeTopicsListing::new(client, node),
                cfg.paging.for_listing("topics"),
            );
            print_pages(PagingSession::new(sequencer), range, |t: &v2ex::Topic| {
                format!("#{} [{} replies] {}", t.id, t.replies, t.title)
            })
            .await?;
        }
        Listing::Replies { topic_id, range } => {
            let sequencer = PageSequencer::new(
                "replies",
                v2ex::TopicRepliesListing::new(client, topic_id),
                cfg.paging.for_listing("replies"),
            );
            print_pages(PagingSession::new(sequencer), range, |r: &v2ex::Reply| {
                format!(
                    "{} {}:\n{}\n",
                    r.created.format("%Y-%m-%d %H:%M"),
                    r.member.username,
                    html::process(&r.content_rendered, &no_images)
                )
            })
            .await?;
        }
        Listing::MemberTopics { username, range } => {
            let paging = cfg.paging.for_listing("member-topics");
            let sequencer = PageSequencer::new(
                "member-topics",
                v2ex::MemberTopicsListing::new(client, username, paging),
                paging,
            );
            print_pages(PagingSession::new(sequencer), range, |t: &v2ex::Topic| {
                format!("#{} [{} replies] {}", t.id, t.replies, t.title)
            })
            .await?;
        }
        Listing::Search { keyword, range } => {
            let paging = cfg.paging.for_listing("search");
            let sequencer = PageSequencer::new(
                "search",
                v2ex::SearchListing::new(client, keyword, paging),
                paging,
            );
            print_pages(PagingSession::new(sequencer), range, |hit: &v2ex::SearchHit| {
                format!("#{} [{} replies] {} by {}", hit.id, hit.replies, hit.title, hit.member)
            })
            .await?;
        }
    }
    Ok(())
}

async fn print_pages<T, F, S>(
    mut session: PagingSession<T, F, S>,
    range: PageRange,
    render: impl Fn(&T) -> String,
) -> Result<()>
where
    F: ListingFetcher<T>,
    S: CountSink,
{
    let listing = session.sequencer().name().to_string();
    session.start(Some(range.start)).await?;
    for _ in 1..range.pages {
        if session.load_next().await?.is_none() {
            break;
        }
    }

    for loaded in session.state().pages() {
        println!("-- {listing} page {} --", loaded.key);
        for item in loaded.window.items() {
            println!("{}", render(item));
        }
    }
    if let Some(last) = session.state().last() {
        match last.window.next_key() {
            Some(next) => println!("-- more: --page {next} --"),
            None => println!("-- end of {listing} --"),
        }
    }
    Ok(())
}
