//! Verify PDF Signatures
//!
//! Verifies every signature in one or more PDFs and prints a report per signature.
//! Exits non-zero when any signature is not valid.
//!
//! Usage:
//!   cargo run --release --bin verify_signatures -- signed.pdf
//!   cargo run --release --bin verify_signatures -- --json --parallel a.pdf b.pdf

use pdf_seal::{PdfDocument, Result, SealConfig, SignatureVerifier, VerificationResult};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

struct VerifyConfig {
    files: Vec<PathBuf>,
    json: bool,
    parallel: bool,
}

impl VerifyConfig {
    fn from_args() -> Self {
        let mut files = Vec::new();
        let mut json = false;
        let mut parallel = false;
        for arg in std::env::args().skip(1) {
            match arg.as_str() {
                "--json" => json = true,
                "--parallel" => parallel = true,
                _ => files.push(PathBuf::from(arg)),
            }
        }
        Self { files, json, parallel }
    }
}

#[derive(Serialize)]
struct FileReport {
    file: String,
    signatures: Vec<SignatureReport>,
    error: Option<String>,
}

#[derive(Serialize)]
struct SignatureReport {
    status: String,
    #[serde(flatten)]
    result: VerificationResult,
}

fn verify_file(verifier: &SignatureVerifier, path: &PathBuf) -> Result<Vec<VerificationResult>> {
    let document = PdfDocument::open(path)?;
    verifier.verify(&document)
}

fn print_text(report: &FileReport) {
    println!("{}", report.file);
    if let Some(error) = &report.error {
        println!("  error: {}", error);
        return;
    }
    if report.signatures.is_empty() {
        println!("  no signatures");
    }
    for sig in &report.signatures {
        let r = &sig.result;
        println!(
            "  #{} {} [{}] {}",
            r.index,
            r.signature_id,
            r.signature_info.sub_filter.as_deref().unwrap_or("-"),
            sig.status
        );
        if let Some(cn) = &r.signature_info.certificate_cn {
            println!("    signer:      {}", cn);
        }
        if let Some(time) = &r.signature_info.signing_time {
            println!("    signed at:   {}", time);
        }
        println!("    signature:   {}", if r.cryptographic_valid { "valid" } else { "INVALID" });
        println!("    integrity:   {}", if r.integrity_valid { "intact" } else { "MODIFIED" });
        println!("    whole file:  {}", r.signature_info.covers_whole_document);
        if let Some(valid) = r.timestamp_valid {
            println!("    timestamp:   {}", if valid { "valid" } else { "INVALID" });
        }
        for e in &r.errors {
            println!("    error:   {:?}: {}", e.kind, e.message);
        }
        for w in &r.warnings {
            println!("    warning: {:?}: {}", w.kind, w.message);
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let config = VerifyConfig::from_args();
    if config.files.is_empty() {
        eprintln!("usage: verify_signatures [--json] [--parallel] <file.pdf>...");
        return ExitCode::from(2);
    }

    let verifier = SignatureVerifier::with_config(SealConfig::default().with_parallel_verification(config.parallel));
    let mut all_valid = true;
    let mut reports = Vec::new();
    for path in &config.files {
        let report = match verify_file(&verifier, path) {
            Ok(results) => FileReport {
                file: path.display().to_string(),
                signatures: results
                    .into_iter()
                    .map(|result| {
                        let status = result.status();
                        all_valid &= status.is_ok();
                        SignatureReport {
                            status: format!("{:?}", status),
                            result,
                        }
                    })
                    .collect(),
                error: None,
            },
            Err(e) => {
                all_valid = false;
                FileReport {
                    file: path.display().to_string(),
                    signatures: Vec::new(),
                    error: Some(e.to_string()),
                }
            },
        };
        if !config.json {
            print_text(&report);
        }
        reports.push(report);
    }

    if config.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            },
        }
    }

    if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
