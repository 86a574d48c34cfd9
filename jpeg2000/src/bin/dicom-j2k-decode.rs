//! A CLI tool for decoding the JPEG 2000 pixel data of a DICOM file
//! into native pixel data (Explicit VR Little Endian).
use clap::{Parser, ValueEnum};
use dicom_dictionary_std::{tags, uids};
use dicom_encoding::TransferSyntaxIndex;
use dicom_jpeg2000::{DecoderOptions, DecoderRegistry, PlanarConfigurationPolicy, UidCreation};
use dicom_object::open_file;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{OptionExt, Report, Whatever};
use std::path::PathBuf;
use tracing::{info, Level};

/// Exit code for when an error emerged while reading the DICOM file.
const ERROR_READ: i32 = -2;
/// Exit code for when an error emerged while decoding the pixel data.
const ERROR_DECODE: i32 = -3;
/// Exit code for when an error emerged while writing the file.
const ERROR_WRITE: i32 = -4;
/// Exit code for any other error.
const ERROR_OTHER: i32 = -128;

/// Decode a JPEG 2000 compressed DICOM file
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    file: PathBuf,
    /// The output file (default is to change the extension to .new.dcm)
    #[clap(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Planar configuration of decoded color images
    #[clap(long = "planar-config", value_enum, default_value_t = PlanarConfigArg::Restore)]
    planar_config: PlanarConfigArg,

    /// Assignment of a new SOP Instance UID
    #[clap(long = "uid-creation", value_enum, default_value_t = UidCreationArg::Default)]
    uid_creation: UidCreationArg,

    /// Do not trust the basic offset table
    #[clap(long = "ignore-offset-table")]
    ignore_offset_table: bool,

    /// Skip frames with an invalid bitstream instead of failing
    #[clap(long = "force-single-fragment")]
    force_single_fragment: bool,

    /// Retain the original implementation class UID and version name
    #[clap(long)]
    retain_implementation: bool,

    /// Verbose mode
    #[clap(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum PlanarConfigArg {
    /// keep the planar configuration of the compressed image
    Restore,
    /// determine from SOP class and photometric interpretation
    Auto,
    /// always color-by-pixel
    ByPixel,
    /// always color-by-plane
    ByPlane,
}

impl From<PlanarConfigArg> for PlanarConfigurationPolicy {
    fn from(value: PlanarConfigArg) -> Self {
        match value {
            PlanarConfigArg::Restore => PlanarConfigurationPolicy::Restore,
            PlanarConfigArg::Auto => PlanarConfigurationPolicy::Auto,
            PlanarConfigArg::ByPixel => PlanarConfigurationPolicy::ColorByPixel,
            PlanarConfigArg::ByPlane => PlanarConfigurationPolicy::ColorByPlane,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum UidCreationArg {
    /// keep the SOP Instance UID
    Default,
    /// always assign a new SOP Instance UID
    Always,
    /// never assign a new SOP Instance UID
    Never,
}

impl From<UidCreationArg> for UidCreation {
    fn from(value: UidCreationArg) -> Self {
        match value {
            UidCreationArg::Default => UidCreation::Default,
            UidCreationArg::Always => UidCreation::Always,
            UidCreationArg::Never => UidCreation::Never,
        }
    }
}

fn main() {
    run().unwrap_or_else(|e| {
        eprintln!("{}", Report::from_error(e));
        std::process::exit(ERROR_OTHER);
    });
}

fn run() -> Result<(), Whatever> {
    let App {
        file,
        output,
        planar_config,
        uid_creation,
        ignore_offset_table,
        force_single_fragment,
        retain_implementation,
        verbose,
    } = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .finish(),
    )
    .unwrap_or_else(|e| {
        eprintln!("{}", snafu::Report::from_error(e));
    });

    let output = output.unwrap_or_else(|| {
        let mut file = file.clone();
        file.set_extension("new.dcm");
        file
    });

    let mut obj = open_file(file).unwrap_or_else(|e| {
        eprintln!("{}", Report::from_error(e));
        std::process::exit(ERROR_READ);
    });

    let options = DecoderOptions::new()
        .with_planar_configuration(planar_config.into())
        .with_uid_creation(uid_creation.into())
        .with_ignore_offset_table(ignore_offset_table)
        .with_force_single_fragment_per_frame(force_single_fragment);
    let registry = DecoderRegistry::with_jpeg2000(options);

    let ts_uid = obj.meta().transfer_syntax().to_string();
    let decoder = registry
        .get(&ts_uid)
        .whatever_context("Not a JPEG 2000 transfer syntax")?;
    if !decoder.can_change_coding(&ts_uid, uids::EXPLICIT_VR_LITTLE_ENDIAN) {
        snafu::whatever!("Cannot decode {} to Explicit VR Little Endian", ts_uid);
    }
    info!("Decoding with {}", decoder.library_version());

    let outcome = decoder.decode(&mut obj).unwrap_or_else(|e| {
        eprintln!("{}", Report::from_error(e));
        std::process::exit(ERROR_DECODE);
    });
    info!(
        "Decoded {} frame(s), {} skipped",
        outcome.frames.len(),
        outcome.skipped_frames()
    );

    let ts = TransferSyntaxRegistry
        .get(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .whatever_context("Explicit VR Little Endian is missing")?;
    let sop_instance_uid = obj
        .element(tags::SOP_INSTANCE_UID)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|uid| uid.trim_end_matches('\0').to_string());

    obj.update_meta(|meta| {
        meta.set_transfer_syntax(ts);
        // keep the meta group consistent with a new instance UID
        if let Some(uid) = sop_instance_uid {
            meta.media_storage_sop_instance_uid = uid;
        }
        // override implementation class UID and version name
        if !retain_implementation {
            meta.implementation_class_uid = dicom_object::IMPLEMENTATION_CLASS_UID.to_string();
            meta.implementation_version_name =
                Some(dicom_object::IMPLEMENTATION_VERSION_NAME.to_string());
        }
    });

    // write to file
    obj.write_to_file(output).unwrap_or_else(|e| {
        eprintln!("{}", Report::from_error(e));
        std::process::exit(ERROR_WRITE);
    });

    Ok(())
}
