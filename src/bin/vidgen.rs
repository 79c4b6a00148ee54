//! CLI for vidgen - image-to-video generation across providers.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use vidgen::image::ImageAnalyzer;
use vidgen::speech::{SpeechClient, VoiceSettings, DEFAULT_VOICE_ID};
use vidgen::store::{GenerationStore, MemoryStore, SqliteStore, VideoStatus};
use vidgen::video::{pricing, AspectRatio, Dispatcher, ImageRef, ProviderId, VideoGenerationRequest};
use vidgen::{Config, Sanitizer};

#[derive(Parser)]
#[command(name = "vidgen")]
#[command(about = "Animate images into videos via AI APIs (fal.ai, Veo, Open-Sora)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List providers with availability and prices
    Providers,

    /// Estimate the cost of a generation
    Estimate(EstimateArgs),

    /// Show what the sanitizer does to a prompt
    Sanitize {
        /// The prompt to clean
        prompt: String,
    },

    /// Animate an image
    Generate(GenerateArgs),

    /// Describe an image and recommend a provider
    Analyze {
        /// Image URL, path or data URI
        image: String,
    },

    /// Synthesize speech with ElevenLabs
    Speak(SpeakArgs),

    /// Show stored generations, analyses or audio
    History(HistoryArgs),

    /// Show spend by service
    Usage,

    /// Show or set prepaid balances
    Balance(BalanceArgs),
}

#[derive(Args)]
struct EstimateArgs {
    /// Provider id, e.g. fal_veo3
    #[arg(short, long)]
    provider: ProviderId,

    /// Requested duration in seconds
    #[arg(short, long, default_value_t = 8)]
    duration: u32,

    /// Include an audio track
    #[arg(long)]
    audio: bool,
}

#[derive(Args)]
struct GenerateArgs {
    /// Image URL, path or data URI
    image: String,

    /// Motion prompt
    prompt: String,

    /// Provider id, e.g. fal_veo3
    #[arg(short, long)]
    provider: ProviderId,

    /// Requested duration in seconds
    #[arg(short, long, default_value_t = 8)]
    duration: u32,

    /// Include an audio track
    #[arg(long)]
    audio: bool,

    /// Aspect ratio (16:9, 9:16 or 1:1)
    #[arg(long, default_value = "16:9")]
    aspect_ratio: AspectRatio,

    /// Audio track to lip-sync (fal_wav2lip)
    #[arg(long)]
    audio_url: Option<String>,
}

#[derive(Args)]
struct SpeakArgs {
    /// Text to speak
    text: Option<String>,

    /// Voice id
    #[arg(long, default_value = DEFAULT_VOICE_ID)]
    voice: String,

    /// Voice stability (0.0-1.0)
    #[arg(long, default_value_t = 0.5)]
    stability: f64,

    /// Similarity boost (0.0-1.0)
    #[arg(long, default_value_t = 0.75)]
    similarity_boost: f64,

    /// Style exaggeration (0.0-1.0)
    #[arg(long, default_value_t = 0.0)]
    style: f64,

    /// Speaking rate
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// List voices instead of speaking
    #[arg(long)]
    list_voices: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HistoryKind {
    Videos,
    Analyses,
    Audio,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<StatusArg> for VideoStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => VideoStatus::Pending,
            StatusArg::Processing => VideoStatus::Processing,
            StatusArg::Completed => VideoStatus::Completed,
            StatusArg::Failed => VideoStatus::Failed,
        }
    }
}

#[derive(Args)]
struct HistoryArgs {
    /// What to list
    #[arg(value_enum, default_value = "videos")]
    kind: HistoryKind,

    /// Only videos with this status
    #[arg(long, value_enum)]
    status: Option<StatusArg>,

    /// Maximum number of entries
    #[arg(short, long, default_value_t = 20)]
    limit: usize,

    /// Delete the entry with this id instead of listing
    #[arg(long)]
    delete: Option<Uuid>,
}

#[derive(Args)]
struct BalanceArgs {
    /// Billing service (fal_ai, google, huggingface, elevenlabs)
    #[arg(long, requires = "amount")]
    service: Option<String>,

    /// Amount loaded, in USD
    #[arg(long, requires = "service")]
    amount: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vidgen=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Providers => list_providers(&config, cli.json)?,
        Commands::Estimate(args) => estimate(args, cli.json)?,
        Commands::Sanitize { prompt } => sanitize(&prompt, cli.json)?,
        Commands::Generate(args) => {
            let ok = generate(&config, args, cli.json).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Analyze { image } => analyze(&config, &image, cli.json).await?,
        Commands::Speak(args) => speak(&config, args, cli.json).await?,
        Commands::History(args) => history(&config, args, cli.json).await?,
        Commands::Usage => usage(&config, cli.json).await?,
        Commands::Balance(args) => balance(&config, args, cli.json).await?,
    }

    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(&config.db_path).await?))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn list_providers(config: &Config, json_output: bool) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::from_config(config, Arc::new(MemoryStore::new()));
    let providers = dispatcher.list_available_providers();

    if json_output {
        return print_json(&providers);
    }

    println!("Video providers:\n");
    for (id, info) in &providers {
        let status = if info.available { "✓" } else { "✗" };
        println!("  {} {} ({})", status, info.name, id);
        println!("    {}", info.description);
        if info.free_tier {
            println!("    free tier, up to {}s", info.max_duration);
        } else if info.supports_audio {
            println!(
                "    ${:.3}/s, ${:.3}/s with audio, up to {}s",
                info.cost_per_second, info.cost_per_second_with_audio, info.max_duration
            );
        } else {
            println!("    ${:.3}/s, up to {}s", info.cost_per_second, info.max_duration);
        }
    }
    Ok(())
}

fn estimate(args: EstimateArgs, json_output: bool) -> anyhow::Result<()> {
    let cost = pricing::estimate(args.provider, args.duration, args.audio);

    if json_output {
        return print_json(&serde_json::json!({
            "provider": args.provider,
            "duration_secs": args.duration,
            "with_audio": args.audio,
            "estimated_cost": pricing::round_cents(cost),
        }));
    }
    println!(
        "{} for {}s{}: ${:.2}",
        args.provider,
        args.duration,
        if args.audio { " with audio" } else { "" },
        pricing::round_cents(cost)
    );
    Ok(())
}

fn sanitize(prompt: &str, json_output: bool) -> anyhow::Result<()> {
    let sanitizer = Sanitizer::default();
    let cleaned = sanitizer.clean(prompt);

    if json_output {
        return print_json(&serde_json::json!({
            "ruleset": sanitizer.version(),
            "original": prompt,
            "sanitized": cleaned,
        }));
    }
    println!("{}", cleaned.text);
    if cleaned.altered {
        eprintln!(
            "(removed {} phrase(s), softened {} term(s))",
            cleaned.removed_phrases, cleaned.softened_terms
        );
    }
    Ok(())
}

/// Returns `false` when the generation failed; the error has been printed.
async fn generate(config: &Config, args: GenerateArgs, json_output: bool) -> anyhow::Result<bool> {
    let image = ImageRef::parse(&args.image)?;
    let mut request = VideoGenerationRequest::new(args.provider, image, args.prompt)
        .with_duration(args.duration)
        .with_audio(args.audio)
        .with_aspect_ratio(args.aspect_ratio);
    if let Some(url) = args.audio_url {
        request = request.with_audio_url(url);
    }

    let store = open_store(config).await?;
    let dispatcher = Dispatcher::from_config(config, store.clone());
    let outcome = dispatcher.generate_video_with_record(request).await;
    store.close().await;

    match outcome {
        Ok((record_id, video)) => {
            if json_output {
                print_json(&serde_json::json!({
                    "success": true,
                    "id": record_id,
                    "video": video,
                }))?;
            } else {
                println!("Generated video: {} via {}", video.video_url(), video.provider());
                println!(
                    "Duration: {}s{}, cost: ${:.2}",
                    video.duration_secs(),
                    if video.with_audio() { " with audio" } else { "" },
                    pricing::round_cents(video.cost())
                );
            }
            Ok(true)
        }
        Err(err) => {
            if json_output {
                print_json(&err.to_response())?;
            } else {
                eprintln!("[{}] {}", err.kind(), err.user_message());
            }
            Ok(false)
        }
    }
}

async fn analyze(config: &Config, image: &str, json_output: bool) -> anyhow::Result<()> {
    let analyzer = ImageAnalyzer::from_config(config)?;
    let image_ref = ImageRef::parse(image)?;
    let analysis = analyzer.analyze(&image_ref).await?;

    let store = open_store(config).await?;
    if let Err(err) = store.insert_analysis(&analysis.to_record(image_ref.to_string())).await {
        tracing::warn!(error = %err, "could not store analysis");
    }
    store.close().await;

    if json_output {
        return print_json(&serde_json::json!({
            "success": true,
            "analysis": analysis,
            "recommended_provider": analysis.recommended_provider(),
        }));
    }
    println!("{}", analysis.description);
    println!("Subject: {}", analysis.subject_type);
    match analysis.recommended_provider() {
        Some(id) => println!("Recommended: {} ({})", analysis.recommended_model, id),
        None => println!("Recommended: {}", analysis.recommended_model),
    }
    println!("Why: {}", analysis.reason);
    for tip in &analysis.tips {
        println!("  - {tip}");
    }
    Ok(())
}

async fn speak(config: &Config, args: SpeakArgs, json_output: bool) -> anyhow::Result<()> {
    let client = SpeechClient::from_config(config)?;

    if args.list_voices {
        let voices = client.voices().await?;
        if json_output {
            return print_json(&voices);
        }
        for voice in &voices {
            println!("  {} {} ({})", voice.voice_id, voice.name, voice.category);
        }
        return Ok(());
    }

    let Some(text) = args.text else {
        anyhow::bail!("nothing to speak: pass TEXT or --list-voices");
    };
    let settings = VoiceSettings {
        stability: args.stability,
        similarity_boost: args.similarity_boost,
        style: args.style,
        speed: args.speed,
        ..VoiceSettings::default()
    };
    let speech = client.synthesize(&text, &args.voice, &settings).await?;

    let store = open_store(config).await?;
    let record = speech.to_record();
    if let Err(err) = store.insert_audio(&record).await {
        tracing::warn!(error = %err, "could not store audio");
    }
    if let Err(err) = store.record_usage(&speech.to_usage()).await {
        tracing::warn!(error = %err, "could not record usage");
    }
    store.close().await;

    if json_output {
        return print_json(&serde_json::json!({
            "success": true,
            "audio_id": record.id,
            "audio_url": speech.audio_url,
            "duration_secs": speech.duration_secs,
            "cost": speech.cost,
        }));
    }
    println!(
        "Synthesized {} characters (~{:.1}s), cost: ${:.2}",
        speech.characters,
        speech.duration_secs,
        pricing::round_cents(speech.cost)
    );
    println!("Stored as audio {}", record.id);
    Ok(())
}

async fn history(config: &Config, args: HistoryArgs, json_output: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;

    if let Some(id) = args.delete {
        let deleted = match args.kind {
            HistoryKind::Videos => store.delete_video(id).await?,
            HistoryKind::Analyses => store.delete_analysis(id).await?,
            HistoryKind::Audio => store.delete_audio(id).await?,
        };
        store.close().await;
        if json_output {
            return print_json(&serde_json::json!({ "id": id, "deleted": deleted }));
        }
        println!("{}", if deleted { "Deleted" } else { "Not found" });
        return Ok(());
    }

    match args.kind {
        HistoryKind::Videos => {
            let videos = store
                .list_videos(args.status.map(Into::into), args.limit)
                .await?;
            if json_output {
                print_json(&videos)?;
            } else {
                for v in &videos {
                    println!(
                        "{} {} {} ({}) {}s {}",
                        v.created_at.format("%Y-%m-%d %H:%M"),
                        v.status,
                        v.provider,
                        v.mode.as_str(),
                        v.duration_secs,
                        v.id
                    );
                    if let Some(url) = &v.video_url {
                        println!("    {url}");
                    }
                    if let Some(err) = &v.error {
                        println!("    error: {err}");
                    }
                }
            }
        }
        HistoryKind::Analyses => {
            let analyses = store.list_analyses(args.limit).await?;
            if json_output {
                print_json(&analyses)?;
            } else {
                for a in &analyses {
                    println!(
                        "{} {} {} {}",
                        a.created_at.format("%Y-%m-%d %H:%M"),
                        a.recommended_model,
                        a.image_ref,
                        a.id
                    );
                }
            }
        }
        HistoryKind::Audio => {
            let audio = store.list_audio(args.limit).await?;
            if json_output {
                // Inline audio is large; list metadata only.
                let rows: Vec<_> = audio
                    .iter()
                    .map(|a| {
                        serde_json::json!({
                            "id": a.id,
                            "voice_id": a.voice_id,
                            "text": a.text,
                            "duration_secs": a.duration_secs,
                            "cost": a.cost,
                            "created_at": a.created_at,
                        })
                    })
                    .collect();
                print_json(&rows)?;
            } else {
                for a in &audio {
                    println!(
                        "{} {} {:.1}s {}",
                        a.created_at.format("%Y-%m-%d %H:%M"),
                        a.voice_id,
                        a.duration_secs,
                        a.id
                    );
                }
            }
        }
    }

    store.close().await;
    Ok(())
}

async fn usage(config: &Config, json_output: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let summary = store.usage_summary().await?;
    store.close().await;

    if json_output {
        return print_json(&summary);
    }
    println!("Total spent: ${:.2}\n", summary.total_spent);
    for (service, spent) in &summary.by_service {
        println!("  {service}: ${spent:.2}");
    }
    if !summary.recent.is_empty() {
        println!("\nRecent:");
        for u in &summary.recent {
            println!(
                "  {} {} {} ${:.2}",
                u.created_at.format("%Y-%m-%d %H:%M"),
                u.service,
                u.operation,
                u.cost
            );
        }
    }
    Ok(())
}

async fn balance(config: &Config, args: BalanceArgs, json_output: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    if let (Some(service), Some(amount)) = (&args.service, args.amount) {
        if !amount.is_finite() || amount < 0.0 {
            anyhow::bail!("balance must be a non-negative amount");
        }
        store.upsert_balance(service, amount).await?;
    }
    let summary = store.usage_summary().await?;
    store.close().await;

    if json_output {
        return print_json(&summary.balances);
    }
    if summary.balances.is_empty() {
        println!("No balances configured. Set one with --service <name> --amount <usd>.");
    }
    for b in &summary.balances {
        println!(
            "  {}: ${:.2} of ${:.2} left (${:.2} spent)",
            b.service, b.remaining, b.initial, b.spent
        );
    }
    Ok(())
}
