use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use webicon_core::cache::{MemoryResolutionCache, ResolutionCache, SqliteResolutionCache};
use webicon_core::canonical::canonicalize;
use webicon_core::config::{WebIconConfig, load_config};
use webicon_core::fallback::{
    DEFAULT_SERVICE_TEMPLATE, display_icon_url_with, service_icon_url_with, stable_color,
};
use webicon_core::resolver::FaviconResolver;
use webicon_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_layout, normalize_for_display,
    resolve_paths,
};

#[derive(Debug, Parser)]
#[command(
    name = "webicon",
    version,
    about = "Resolve favicons for web pages, with a durable cache and fallbacks"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Use an in-memory cache instead of favicons.db")]
    no_cache: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Log debug events to stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    no_cache: bool,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            no_cache: cli.no_cache,
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the data directory and a default config file")]
    Init(InitArgs),
    #[command(about = "Resolve the favicon of a page")]
    Resolve(UrlArgs),
    #[command(about = "Print the url to display: resolved icon or fallback service url")]
    Icon(UrlArgs),
    #[command(about = "Print the canonical form of a url")]
    Canonicalize(UrlArgs),
    #[command(name = "fallback-url", about = "Print the fallback icon service url")]
    FallbackUrl(UrlArgs),
    #[command(about = "Print the stable placeholder colour for a text")]
    Color(ColorArgs),
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct UrlArgs {
    url: String,
}

#[derive(Debug, Args)]
struct ColorArgs {
    text: String,
}

#[derive(Debug, Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Debug, Subcommand)]
enum CacheSubcommand {
    Stats,
    Show { url: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Resolve(UrlArgs { url })) => run_resolve(&runtime, &url),
        Some(Commands::Icon(UrlArgs { url })) => run_icon(&runtime, &url),
        Some(Commands::Canonicalize(UrlArgs { url })) => run_canonicalize(&url),
        Some(Commands::FallbackUrl(UrlArgs { url })) => run_fallback_url(&runtime, &url),
        Some(Commands::Color(ColorArgs { text })) => run_color(&text),
        Some(Commands::Cache(CacheArgs { command })) => match command {
            CacheSubcommand::Stats => run_cache_stats(&runtime),
            CacheSubcommand::Show { url } => run_cache_show(&runtime, &url),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, args.force)?;

    println!("Initialized webicon runtime layout");
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", format_flag(report.wrote_config));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_resolve(runtime: &RuntimeOptions, url: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let resolver = build_resolver(runtime, &paths, &config)?;

    let resolution = resolver.try_resolve(url)?;
    println!("page_url: {}", resolution.page_url);
    println!("source: {}", resolution.source.as_str());
    println!("icons: {}", resolution.icons.len());
    for icon in resolution.icons.as_slice() {
        println!("icon: {icon}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_icon(runtime: &RuntimeOptions, url: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let resolver = build_resolver(runtime, &paths, &config)?;
    let template = service_template(&config);

    let icons = resolver.resolve(url);
    let page_url = canonicalize(url)
        .map(|canonical| canonical.to_string())
        .unwrap_or_else(|_| url.to_string());
    println!("{}", display_icon_url_with(&template, &page_url, &icons));
    Ok(())
}

fn run_canonicalize(url: &str) -> Result<()> {
    let canonical = canonicalize(url)?;
    println!("{canonical}");
    Ok(())
}

fn run_fallback_url(runtime: &RuntimeOptions, url: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    println!("{}", service_icon_url_with(&service_template(&config), url));
    Ok(())
}

fn run_color(text: &str) -> Result<()> {
    println!("{}", stable_color(text));
    Ok(())
}

fn run_cache_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    if !paths.db_path.exists() {
        bail!(
            "cache database not found at {}; run `webicon resolve <url>` first",
            normalize_for_display(&paths.db_path)
        );
    }
    let cache = SqliteResolutionCache::open(&paths.db_path)?;
    let stats = cache.stats()?;

    println!("cache stats");
    println!("db_path: {}", normalize_for_display(cache.path()));
    println!("entries: {}", stats.entries);
    println!("empty_entries: {}", stats.empty_entries);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_cache_show(runtime: &RuntimeOptions, url: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let page_url = canonicalize(url)?;
    if !paths.db_path.exists() {
        println!("page_url: {page_url}");
        println!("cached: {}", format_flag(false));
        return Ok(());
    }
    let cache = SqliteResolutionCache::open(&paths.db_path)?;

    println!("page_url: {page_url}");
    match cache.entry(&page_url)? {
        Some(entry) => {
            println!("cached: {}", format_flag(true));
            println!("stored_at: {}", entry.stored_at);
            println!("icons: {}", entry.icons.len());
            for icon in entry.icons.as_slice() {
                println!("icon: {icon}");
            }
        }
        None => println!("cached: {}", format_flag(false)),
    }
    Ok(())
}

fn build_resolver(
    runtime: &RuntimeOptions,
    paths: &ResolvedPaths,
    config: &WebIconConfig,
) -> Result<FaviconResolver> {
    let cache: Arc<dyn ResolutionCache> = if runtime.no_cache {
        Arc::new(MemoryResolutionCache::default())
    } else {
        Arc::new(SqliteResolutionCache::open(&paths.db_path)?)
    };
    FaviconResolver::with_http(&config.fetch_config(), cache)
        .context("failed to initialize page fetcher")
}

fn service_template(config: &WebIconConfig) -> String {
    config
        .service_template()
        .unwrap_or_else(|| DEFAULT_SERVICE_TEMPLATE.to_string())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };
    let paths = resolve_paths(&context, &overrides)?;
    debug!(
        db_path = %normalize_for_display(&paths.db_path),
        config_path = %normalize_for_display(&paths.config_path),
        "resolved runtime paths"
    );
    Ok(paths)
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
