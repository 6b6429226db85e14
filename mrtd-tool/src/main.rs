use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use mrtd_reader::bac;
use mrtd_reader::lds::LdsFileTag;
use mrtd_reader::mrz::Mrz;
use mrtd_reader::mrz_key::MrzKey;
use mrtd_reader::passport::{ChallengeSigs, PassportData};
use mrtd_reader::reader::{MrtdReader, ReaderConfig};
use mrtd_reader::tag::MrtdTag;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;


type BoxedError = Box<dyn std::error::Error>;


#[derive(Clone, Debug, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
#[command(version, about = "Reads ICAO 9303 travel documents over Basic Access Control")]
struct Opts {
    /// Raises the log level; repeat for more detail. `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Subcommand)]
enum Mode {
    /// Lists the PC/SC readers attached to this machine.
    ListReaders,

    /// Reads files from the passport on a reader and prints them as JSON.
    Read(ReadOpts),
}

#[derive(Clone, Debug, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
struct ReadOpts {
    #[arg(short, long = "reader", default_value = "0")]
    pub reader_index: usize,

    /// File containing the full MRZ as printed on the data page.
    #[arg(short, long = "mrz", conflicts_with_all = ["document_number", "date_of_birth", "date_of_expiry"])]
    pub mrz_path: Option<PathBuf>,

    #[arg(long, requires_all = ["date_of_birth", "date_of_expiry"])]
    pub document_number: Option<String>,

    /// Date of birth as YYMMDD.
    #[arg(long)]
    pub date_of_birth: Option<String>,

    /// Date of expiry as YYMMDD.
    #[arg(long)]
    pub date_of_expiry: Option<String>,

    /// Files to read, e.g. `com,dg1,dg15,sod`.
    #[arg(short, long, value_delimiter = ',', default_values_t = [LdsFileTag::Com, LdsFileTag::Dg1, LdsFileTag::Dg15, LdsFileTag::Sod])]
    pub files: Vec<LdsFileTag>,

    /// Challenge for Active Authentication as a hex string; a multiple of 8 bytes.
    #[arg(short, long)]
    pub challenge: Option<String>,

    #[arg(long, default_value = "224")]
    pub max_read_chunk: usize,

    #[arg(long, default_value = "3")]
    pub max_read_attempts: usize,
}
impl ReadOpts {
    fn mrz_key(&self) -> Result<MrzKey, BoxedError> {
        if let Some(mrz_path) = &self.mrz_path {
            let mrz: Mrz = std::fs::read_to_string(mrz_path)?
                .parse()?;
            if !mrz.is_composite_valid() {
                warn!("composite check digit of the MRZ does not match");
            }
            return Ok(MrzKey::from(&mrz));
        }

        match (&self.document_number, &self.date_of_birth, &self.date_of_expiry) {
            (Some(document_number), Some(date_of_birth), Some(date_of_expiry))
                => Ok(MrzKey::new(document_number, date_of_birth, date_of_expiry)?),
            _ => Err("either --mrz or all of --document-number, --date-of-birth and --date-of-expiry are required".into()),
        }
    }
}


fn list_readers(ctx: &pcsc::Context) -> Result<(), BoxedError> {
    let readers_buf_len = ctx.list_readers_len()?;
    let mut readers_buf = vec![0u8; readers_buf_len];
    for (i, reader) in ctx.list_readers(&mut readers_buf)?.enumerate() {
        println!("{}: {}", i, reader.to_string_lossy());
    }
    Ok(())
}

fn read_passport(ctx: &pcsc::Context, opts: &ReadOpts) -> Result<bool, BoxedError> {
    let mrz_key = opts.mrz_key()?;
    let challenge = match &opts.challenge {
        Some(c) => Some(hex::decode(c)?),
        None => None,
    };

    let readers_buf_len = ctx.list_readers_len()?;
    let mut readers_buf = vec![0u8; readers_buf_len];
    let reader = ctx.list_readers(&mut readers_buf)?
        .nth(opts.reader_index)
        .ok_or_else(|| format!("no reader at index {}", opts.reader_index))?;
    info!("using reader {}", reader.to_string_lossy());

    let card = ctx.connect(reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)?;
    let mut tag = MrtdTag::new(card);

    // PC/SC does not select the application for us
    tag.select_emrtd_application()?;
    bac::establish(&mut tag, &mrz_key)?;
    info!("Basic Access Control established");

    let config = ReaderConfig {
        max_read_chunk: opts.max_read_chunk,
        max_read_attempts: opts.max_read_attempts,
        ..ReaderConfig::default()
    };
    let mut reader = MrtdReader::new(tag, config);
    let outcome = reader.read_files(&opts.files);
    let complete = outcome.is_complete();
    if let Some(e) = &outcome.error {
        error!("reading aborted: {}", e);
    }

    let csigs = match &challenge {
        Some(challenge) if complete => reader.internal_authenticate(challenge)?,
        _ => ChallengeSigs::new(),
    };

    let data = PassportData::new(outcome.files, csigs);
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(complete)
}


fn main() -> ExitCode {
    let opts = Opts::parse();

    let default_level = match opts.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level))
        )
        .with_writer(std::io::stderr)
        .init();

    let result = pcsc::Context::establish(pcsc::Scope::User)
        .map_err(BoxedError::from)
        .and_then(|ctx| match &opts.mode {
            Mode::ListReaders => list_readers(&ctx).map(|()| true),
            Mode::Read(opts) => read_passport(&ctx, opts),
        });

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        },
    }
}
