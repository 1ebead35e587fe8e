use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "ad-headlines",
    version,
    about = "Recover headlines from advertisement creatives with OCR"
)]
struct Cli {
    /// Image files to read
    images: Vec<String>,

    /// Directory of images (non-images are skipped)
    #[arg(short = 'd', long = "dir")]
    dir: Option<String>,

    /// JSON manifest of ad records from the collection stage
    #[arg(short = 'm', long = "manifest")]
    manifest: Option<String>,

    /// Write rows to this file (.csv or .json); prints JSON when omitted
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// OCR language hint (e.g. swe+eng)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Line ranking formula: confidence or geometry
    #[arg(long = "scoring")]
    scoring: Option<String>,

    /// Word grouping: auto, native or geometric
    #[arg(long = "grouping")]
    grouping: Option<String>,

    /// Parallel extractions (0 = all cores)
    #[arg(short = 't', long = "threads")]
    threads: Option<usize>,

    /// Per-image time budget in seconds
    #[arg(long = "image-timeout")]
    image_timeout: Option<u64>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Run the job server on this address (e.g. 127.0.0.1:8080)
    #[arg(long = "server")]
    server: Option<String>,

    /// Show installed tesseract languages and exit
    #[arg(long = "show-ocr-languages")]
    show_ocr_languages: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    ad_headlines::logging::init(cli.verbose)?;

    let output = ad_headlines::run(ad_headlines::Config {
        images: cli.images,
        dir: cli.dir,
        manifest: cli.manifest,
        output: cli.output,
        lang: cli.lang,
        scoring: cli.scoring,
        grouping: cli.grouping,
        threads: cli.threads,
        image_timeout_secs: cli.image_timeout,
        settings_path: cli.read_settings,
        show_ocr_languages: cli.show_ocr_languages,
        server: cli.server,
    })
    .await?;

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
