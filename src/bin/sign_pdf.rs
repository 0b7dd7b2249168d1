//! Sign a PDF
//!
//! Appends one signature to a PDF as an incremental update.
//!
//! Usage:
//!   cargo run --release --bin sign_pdf -- input.pdf output.pdf --cert cert.pem --key key.pem
//!   cargo run --release --bin sign_pdf -- input.pdf output.pdf --cert cert.pem --key key.pem \
//!       --sub-filter cades --digest sha384 --reason "Approved" --tsa http://timestamp.example

use pdf_seal::signatures::{DigestAlgorithm, LocalKeySigner, MdpPermission, PdfSigner, SignOptions};
use pdf_seal::{Error, Result, SignatureSubFilter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

struct SignConfig {
    input: PathBuf,
    output: PathBuf,
    cert: PathBuf,
    key: PathBuf,
    digest: DigestAlgorithm,
    options: SignOptions,
}

impl SignConfig {
    fn from_args() -> Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut positional = Vec::new();
        let mut cert = None;
        let mut key = None;
        let mut digest = DigestAlgorithm::Sha256;
        let mut options = SignOptions::default();

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i)
                    .cloned()
                    .ok_or_else(|| Error::InvalidPdf(format!("{} needs a value", flag)))
            };
            match flag {
                "--cert" => cert = Some(PathBuf::from(value()?)),
                "--key" => key = Some(PathBuf::from(value()?)),
                "--digest" => digest = value()?.parse()?,
                "--sub-filter" => options.sub_filter = value()?.parse::<SignatureSubFilter>()?,
                "--reason" => options = options.with_reason(value()?),
                "--location" => options = options.with_location(value()?),
                "--contact" => options = options.with_contact_info(value()?),
                "--name" => options = options.with_name(value()?),
                "--certify" => options = options.with_certification(value()?.parse::<MdpPermission>()?),
                "--tsa" => options = options.with_timestamp(value()?),
                "--size" => {
                    let size = value()?;
                    let bytes = size
                        .parse::<usize>()
                        .map_err(|_| Error::InvalidPdf(format!("--size expects a byte count, got '{}'", size)))?;
                    options = options.with_estimated_size(bytes);
                },
                other if other.starts_with("--") => {
                    return Err(Error::InvalidPdf(format!("unknown option {}", other)));
                },
                other => positional.push(PathBuf::from(other)),
            }
            i += 1;
        }

        let usage = || Error::InvalidPdf("usage: sign_pdf <input> <output> --cert <pem> --key <pem> [options]".into());
        if positional.len() != 2 {
            return Err(usage());
        }
        let output = positional.pop().ok_or_else(usage)?;
        let input = positional.pop().ok_or_else(usage)?;
        Ok(Self {
            input,
            output,
            cert: cert.ok_or_else(usage)?,
            key: key.ok_or_else(usage)?,
            digest,
            options,
        })
    }
}

fn run() -> Result<()> {
    let config = SignConfig::from_args()?;
    let identity = LocalKeySigner::from_pem(&std::fs::read(&config.cert)?, &std::fs::read(&config.key)?)?
        .with_digest_algorithm(config.digest);
    let signer = PdfSigner::new(Arc::new(identity), config.options);

    let signed = signer.sign(&std::fs::read(&config.input)?)?;
    for warning in &signed.warnings {
        eprintln!("warning: {}", warning);
    }
    std::fs::write(&config.output, &signed.bytes)?;
    println!(
        "Signed {} -> {} (ByteRange {})",
        config.input.display(),
        config.output.display(),
        signed.byte_range.to_pdf_array()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}
