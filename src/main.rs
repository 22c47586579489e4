use std::net::SocketAddr;
use std::path::PathBuf;

use hairlab_backend_core::api::server::serve;
use hairlab_backend_core::default_app_root;
use hairlab_backend_core::pipeline::settings_layer::load_pipeline_config;
use hairlab_backend_core::pipeline::{
    HairPipeline, HairVolume, Photo, StyleDescriptor, TransformStrategy,
};
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(cli_args.first().map(String::as_str), Some("transform")) {
        run_transform_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>()).await?;
        return Ok(());
    }

    let app_root = default_app_root();
    let config_path = std::env::var("HAIRLAB_CONFIG").ok();
    let config = load_pipeline_config(app_root.as_path(), config_path.as_deref())?;
    let pipeline = HairPipeline::connect(&config)?;

    let bind =
        std::env::var("HAIRLAB_BACKEND_BIND").unwrap_or_else(|_| String::from("127.0.0.1:8790"));
    let addr: SocketAddr = bind.parse()?;

    serve(addr, pipeline).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TransformCliArgs {
    photo: PathBuf,
    out: PathBuf,
    style: String,
    reference: Option<PathBuf>,
    strategy: Option<TransformStrategy>,
    color: Option<String>,
    volume: Option<HairVolume>,
    config: Option<String>,
    app_root: Option<PathBuf>,
}

fn parse_transform_cli_args(args: &[String]) -> Result<TransformCliArgs, Box<dyn std::error::Error>> {
    let mut photo = None::<PathBuf>;
    let mut out = None::<PathBuf>;
    let mut style = None::<String>;
    let mut reference = None::<PathBuf>;
    let mut strategy = None::<TransformStrategy>;
    let mut color = None::<String>;
    let mut volume = None::<HairVolume>;
    let mut config = None::<String>;
    let mut app_root = None::<PathBuf>;

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--photo" => photo = Some(PathBuf::from(needs_value(i)?)),
            "--out" => out = Some(PathBuf::from(needs_value(i)?)),
            "--style" => style = Some(needs_value(i)?),
            "--reference" => reference = Some(PathBuf::from(needs_value(i)?)),
            "--strategy" => {
                let raw = needs_value(i)?;
                strategy = Some(TransformStrategy::parse(raw.as_str()).ok_or_else(|| {
                    std::io::Error::other(format!("Unknown strategy: {raw}"))
                })?);
            }
            "--color" => color = Some(needs_value(i)?),
            "--volume" => {
                let raw = needs_value(i)?;
                volume = Some(HairVolume::parse(raw.as_str()).ok_or_else(|| {
                    std::io::Error::other(format!("Unknown volume: {raw}"))
                })?);
            }
            "--config" => config = Some(needs_value(i)?),
            "--app-root" => app_root = Some(PathBuf::from(needs_value(i)?)),
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
        i += 2;
    }

    let photo = photo.ok_or_else(|| std::io::Error::other("Missing required --photo"))?;
    let out = out.ok_or_else(|| std::io::Error::other("Missing required --out"))?;
    let style = style.unwrap_or_default();
    if style.trim().is_empty() && reference.is_none() {
        return Err(std::io::Error::other("Missing required --style (or --reference)").into());
    }
    Ok(TransformCliArgs {
        photo,
        out,
        style,
        reference,
        strategy,
        color,
        volume,
        config,
        app_root,
    })
}

async fn run_transform_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_transform_usage();
        return Ok(());
    }
    let parsed = parse_transform_cli_args(args.as_slice())?;
    let app_root = parsed.app_root.clone().unwrap_or_else(default_app_root);
    let config = load_pipeline_config(app_root.as_path(), parsed.config.as_deref())?;
    let pipeline = HairPipeline::connect(&config)?;

    let photo = Photo::decode(std::fs::read(parsed.photo.as_path())?.as_slice())?;
    let reference = match parsed.reference.as_ref() {
        Some(path) => Some(Photo::decode(std::fs::read(path)?.as_slice())?),
        None => None,
    };
    let style = StyleDescriptor {
        description: parsed.style.clone(),
        color: parsed.color.clone(),
        volume: parsed.volume,
        reference,
        strategy: parsed.strategy,
    };

    let result = pipeline.transform_hair(&photo, &style).await?;
    if let Some(parent) = parsed.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(parsed.out.as_path(), result.photo.encode_png()?)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "request_id": result.request_id,
            "out": parsed.out.display().to_string(),
            "strategy": result.strategy,
            "boundary_source": result.boundary_source,
            "transitions": result.transitions,
        }))?
    );
    Ok(())
}

fn print_transform_usage() {
    eprintln!(
        concat!(
            "Usage:\n",
            "  cargo run -- transform --photo PATH --out PATH --style TEXT ",
            "[--reference PATH] [--strategy inpaint|direct_edit|reference_guided|overlay] ",
            "[--color TEXT] [--volume flat|natural|voluminous] [--config PATH] [--app-root PATH]\n\n",
            "Defaults:\n",
            "  --app-root defaults to HAIRLAB_APP_ROOT, then the working directory\n",
            "  settings default: config/hair_pipeline.toml under the app root (optional)\n",
            "  API keys come from the environment, then <app-root>/.env\n"
        )
    );
}
