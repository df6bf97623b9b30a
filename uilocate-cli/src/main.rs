use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uilocate::image::io::load_rgb;
use uilocate::index::IndexStats;
use uilocate::matcher::StrategyAttempt;
use uilocate::metadata::{
    bottom_performers, global_stats, recommendations, top_performers, unused_since, GlobalStats,
    Performer,
};
use uilocate::resolve::NAMED_PRIORITY;
use uilocate::{
    hamming_distance, perceptual_hash, ImageMatcher, MatchResult, MetadataTracker, OcrLocator,
    Recommendation, ResolverConfig, TemplateStore, TesseractCli, TextHit, VisualIndex,
};

const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "uilocate CLI (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file; defaults apply when it is missing.
    #[arg(short, long, value_name = "FILE", default_value = "uilocate.json")]
    config: PathBuf,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output.
    #[arg(long)]
    trace: bool,
    /// Write the JSON result here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print perceptual hashes; with two images also their Hamming distance.
    Hash { images: Vec<PathBuf> },
    /// Run the image-match cascade of a template against a screenshot.
    Match {
        #[arg(long)]
        screen: PathBuf,
        /// Template image; exits with an error when it is not on screen.
        #[arg(long, required_unless_present = "element", conflicts_with = "element")]
        template: Option<PathBuf>,
        /// Look the template up by element name in the template store.
        #[arg(long)]
        element: Option<String>,
        /// Overrides `image-match-threshold`.
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Locate a labelled field with tesseract.
    Ocr {
        #[arg(long)]
        screen: PathBuf,
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "tesseract")]
        tesseract: PathBuf,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Show template index statistics.
    Index {
        /// Rebuild from the template folders and rewrite the index document.
        #[arg(long)]
        rebuild: bool,
    },
    /// Template health analytics and recommendations.
    Health {
        #[arg(long, default_value_t = 5)]
        top: usize,
        #[arg(long, default_value_t = 30)]
        unused_days: i64,
        /// Reclassify every template as of now and rewrite the sidecars.
        #[arg(long)]
        refresh: bool,
    },
}

#[derive(Debug, Serialize)]
struct HashRecord {
    path: PathBuf,
    hash: String,
}

#[derive(Debug, Serialize)]
struct HashOutput {
    hashes: Vec<HashRecord>,
    distance: Option<u32>,
}

#[derive(Debug, Serialize)]
struct MatchOutput {
    template: PathBuf,
    result: MatchResult,
    attempts: Vec<StrategyAttempt>,
    confidence: f32,
    elapsed_ms: f64,
}

#[derive(Debug, Serialize)]
struct HealthOutput {
    stats: GlobalStats,
    top: Vec<Performer>,
    bottom: Vec<Performer>,
    unused: Vec<PathBuf>,
    recommendations: Vec<Recommendation>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Output {
    Hash(HashOutput),
    Match(MatchOutput),
    Ocr(TextHit),
    Index(IndexStats),
    Health(HealthOutput),
}

fn open_index(config: &ResolverConfig) -> VisualIndex {
    VisualIndex::open(
        TemplateStore::new(config.templates_root.clone()),
        config.index_policy(),
    )
}

fn run(config: &ResolverConfig, command: Command) -> Result<Output, Box<dyn std::error::Error>> {
    let output = match command {
        Command::Hash { images } => {
            if images.is_empty() {
                return Err("hash needs at least one image".into());
            }
            let mut hashes = Vec::with_capacity(images.len());
            for path in images {
                let hash = perceptual_hash(&load_rgb(&path)?);
                hashes.push((path, hash));
            }
            let distance = match hashes.as_slice() {
                [(_, a), (_, b)] => Some(hamming_distance(*a, *b)),
                _ => None,
            };
            Output::Hash(HashOutput {
                hashes: hashes
                    .into_iter()
                    .map(|(path, hash)| HashRecord {
                        path,
                        hash: hash.to_string(),
                    })
                    .collect(),
                distance,
            })
        }
        Command::Match {
            screen,
            template,
            element,
            threshold,
        } => {
            let template = match (template, element) {
                (Some(path), _) => path,
                (None, Some(element)) => open_index(config)
                    .require_named(&element, &NAMED_PRIORITY)?
                    .path
                    .clone(),
                (None, None) => return Err("match needs --template or --element".into()),
            };
            let mut matcher = ImageMatcher::new().with_config(config.match_config());
            if let Some(threshold) = threshold {
                matcher = matcher.with_threshold(threshold);
            }
            let outcome = matcher.find(&load_rgb(&screen)?, &load_rgb(&template)?)?;
            Output::Match(MatchOutput {
                result: outcome.require(&template)?,
                template,
                confidence: outcome.confidence(),
                elapsed_ms: outcome.elapsed.as_secs_f64() * 1000.0,
                attempts: outcome.attempts,
            })
        }
        Command::Ocr {
            screen,
            text,
            tesseract,
            lang,
        } => {
            let mut engine = TesseractCli::new(tesseract);
            if let Some(lang) = lang {
                engine = engine.with_language(lang);
            }
            let locator = OcrLocator::new(engine)
                .with_layout(config.ocr_layout())
                .scale_to_screen(config.ocr_scale_to_screen);
            Output::Ocr(locator.require_text(&load_rgb(&screen)?, &text)?)
        }
        Command::Index { rebuild } => {
            let mut index = open_index(config);
            if rebuild {
                index.rebuild_from_disk();
                index.save()?;
            }
            Output::Index(index.stats())
        }
        Command::Health {
            top,
            unused_days,
            refresh,
        } => {
            let index = open_index(config);
            let mut tracker = MetadataTracker::new(config.health_policy());
            tracker.load_all(&index);
            let now = Utc::now();
            if refresh {
                tracker.refresh_health(now);
            }
            let policy = *tracker.policy();
            Output::Health(HealthOutput {
                stats: global_stats(tracker.iter(), &policy, now),
                top: top_performers(tracker.iter(), top),
                bottom: bottom_performers(tracker.iter(), top),
                unused: unused_since(tracker.iter(), unused_days, now)
                    .into_iter()
                    .map(|m| m.template.path.clone())
                    .collect(),
                recommendations: recommendations(tracker.iter(), &policy, now),
            })
        }
    };
    Ok(output)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("uilocate=info".parse()?))
            .with_target(false)
            .init();
    }

    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let Some(command) = cli.command else {
        return Err("a subcommand is required (hash, match, ocr, index, health)".into());
    };
    let config = ResolverConfig::load_or_default(&cli.config);

    let output = run(&config, command)?;
    let json = serde_json::to_string_pretty(&output)?;
    match cli.output {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }
    Ok(())
}
