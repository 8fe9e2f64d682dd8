#![deny(unsafe_code, unsafe_op_in_unsafe_fn)]
#![warn(
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::todo,
    clippy::unimplemented,
    clippy::unneeded_field_pattern,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::unnecessary_self_imports,
    clippy::str_to_string,
    clippy::string_to_string,
    clippy::string_slice
)]

use std::{ops::ControlFlow, path::PathBuf};

use clap::{Parser, ValueEnum};
use inkmix::{color, BackgroundMode, MaxInks, PixelBuffer, Session, Sharpen};
use palette::Srgb;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Copy, Clone, ValueEnum)]
enum CliBackground {
    Keep,
    White,
    Transparent,
}

impl From<CliBackground> for BackgroundMode {
    fn from(value: CliBackground) -> Self {
        match value {
            CliBackground::Keep => BackgroundMode::Keep,
            CliBackground::White => BackgroundMode::White,
            CliBackground::Transparent => BackgroundMode::Transparent,
        }
    }
}

#[derive(Parser)]
pub struct Options {
    /// The number of original colors to detect.
    #[arg(short, long, default_value_t = 8)]
    k: u8,

    /// Ink colors as `#RRGGBB`. Defaults to the detected palette.
    #[arg(short, long, value_delimiter = ',', value_parser = parse_ink)]
    inks: Vec<Srgb<u8>>,

    /// Allow white as an extra ink.
    #[arg(long)]
    white: bool,

    /// Approximate palette colors with mixes of up to three inks instead of two.
    #[arg(long)]
    three: bool,

    /// How close a mix must come to its target (0-100).
    #[arg(long, default_value_t = 60)]
    sensitivity: u8,

    #[arg(long)]
    dither: bool,

    #[arg(long)]
    sharpen: bool,

    #[arg(long, value_enum, default_value_t = CliBackground::Keep)]
    background: CliBackground,

    /// Integer upscale factor of the output.
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    input: PathBuf,

    output: PathBuf,
}

fn parse_ink(s: &str) -> Result<Srgb<u8>, String> {
    color::parse_hex(s).map_err(|e| format!("{e}"))
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkmix=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let Options {
        k,
        inks,
        white,
        three,
        sensitivity,
        dither,
        sharpen,
        background,
        scale,
        seed,
        input,
        output,
    } = Options::parse();

    let image = image::open(input).unwrap().into_rgba8();
    let source = PixelBuffer::try_from(&image).unwrap();

    let mut session = Session::new();
    {
        let settings = session.settings_mut();
        settings.dither = dither;
        settings.sharpen = sharpen.then(Sharpen::default);
        settings.background = background.into();
        settings.kmeans = settings.kmeans.seed(seed);
        settings.mix = settings
            .mix
            .sensitivity(sensitivity)
            .max_inks(if three { MaxInks::Three } else { MaxInks::Two });
    }

    session.set_source(source);
    let palette = session.extract_palette(k).unwrap();
    tracing::info!(
        palette = %palette.iter().map(|&c| color::to_hex(c)).collect::<Vec<_>>().join(" "),
        "detected palette"
    );

    session.set_allow_white(white);
    if inks.is_empty() {
        session.inks_from_palette();
    } else {
        for ink in inks {
            session.add_ink(ink);
        }
    }
    session.generate_rules();

    for (i, rule) in session.rules().iter().enumerate() {
        if let Some(rule) = rule {
            tracing::info!(
                color = %color::to_hex(session.palette()[i]),
                percents = ?rule.mix.percents,
                error = rule.error.unwrap_or(0.0),
                "mix rule"
            );
        }
    }

    let mut last = 0;
    let mapped = session
        .export(scale, |progress| {
            let percent = progress.rows_done * 100 / progress.rows_total.max(1);
            if percent >= last + 25 {
                last = percent;
                tracing::info!(percent, "progress");
            }
            ControlFlow::Continue(())
        })
        .unwrap();

    mapped.into_rgbaimage().save(output).unwrap();
}
