//! Upload targets for filtered read sets.
//!
//! Each sample's kept reads arrive as gzip chunks on the pipeline's pipe;
//! the uploader drains that pipe concurrently with filtering and stores the
//! result under the sample id. The S3 target issues a single SigV4-signed
//! `PUT`; the local target writes `<out_dir>/<sample_id>.fastq.gz`. Both
//! return the location recorded in the sample's terminal record.

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use hmac::{Hmac, Mac};
use log::{debug, info};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Environment variable holding the access key id.
pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";

/// Environment variable holding the secret access key.
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum BucketError {
    #[error("bucket name is required")]
    NoName,

    #[error("bucket region is required")]
    NoRegion,

    #[error("no {0} environment variable found")]
    MissingCredential(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("request signing error: {0}")]
    Signing(String),
}

/// Where a sample's compressed reads end up.
pub enum Uploader {
    Bucket(Bucket),
    LocalDir(PathBuf),
}

impl Uploader {
    /// Drains the pipe and stores the bytes under `key`. Returns the
    /// location of the stored object.
    pub fn upload(&self, chunks: Receiver<Vec<u8>>, key: &str) -> Result<String, BucketError> {
        match self {
            Uploader::LocalDir(dir) => {
                fs::create_dir_all(dir)?;
                let path = dir.join(format!("{key}.fastq.gz"));
                let mut file = File::create(&path)?;
                for chunk in chunks {
                    file.write_all(&chunk)?;
                }
                file.sync_all()?;
                Ok(path.display().to_string())
            }
            Uploader::Bucket(bucket) => {
                let mut body = Vec::new();
                for chunk in chunks {
                    body.extend_from_slice(&chunk);
                }
                bucket.put_object(key, body)
            }
        }
    }
}

/// An S3 bucket plus the credentials to write to it.
pub struct Bucket {
    name: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
    client: Client,
}

impl Bucket {
    /// Builds the bucket handle, reading credentials from the environment.
    /// Missing credentials are a construction error so a misconfigured
    /// deployment fails at startup rather than at first upload.
    pub fn new(name: &str, region: &str) -> Result<Self, BucketError> {
        if name.is_empty() {
            return Err(BucketError::NoName);
        }
        if region.is_empty() {
            return Err(BucketError::NoRegion);
        }
        let access_key_id =
            env::var(ACCESS_KEY_VAR).map_err(|_| BucketError::MissingCredential(ACCESS_KEY_VAR))?;
        let secret_access_key =
            env::var(SECRET_KEY_VAR).map_err(|_| BucketError::MissingCredential(SECRET_KEY_VAR))?;
        let client = Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
        Ok(Bucket {
            name: name.to_string(),
            region: region.to_string(),
            access_key_id,
            secret_access_key,
            client,
        })
    }

    fn host(&self) -> String {
        format!("{}.s3.{}.amazonaws.com", self.name, self.region)
    }

    /// Single-shot signed `PUT` of the object body.
    fn put_object(&self, key: &str, body: Vec<u8>) -> Result<String, BucketError> {
        let host = self.host();
        let canonical_uri = format!("/{}", uri_encode(key, false));
        let url = format!("https://{}{}", host, canonical_uri);

        let now: DateTime<Utc> = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = sha256_hex(&body);

        let headers = [
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        let (signed_headers, canonical) =
            canonical_request("PUT", &canonical_uri, "", &headers, &payload_hash);
        let signature = compute_signature(
            &self.secret_access_key,
            &date,
            &self.region,
            &amz_date,
            &canonical,
        )?;
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}/{}/s3/aws4_request, SignedHeaders={}, Signature={}",
            self.access_key_id, date, self.region, signed_headers, signature
        );

        debug!("PUT {} ({} bytes)", url, body.len());
        let response = self
            .client
            .put(&url)
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", &payload_hash)
            .header("authorization", &authorization)
            .body(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(BucketError::Rejected {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        info!("uploaded {} to {}", key, url);
        Ok(url)
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, BucketError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| BucketError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

// Percent-encodes everything outside the unreserved set; '/' survives in
// path position.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

// Headers must arrive lowercase and sorted by name.
fn canonical_request(
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    headers: &[(String, String)],
    payload_hash: &str,
) -> (String, String) {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
    );
    (signed_headers, request)
}

fn compute_signature(
    secret: &str,
    date: &str,
    region: &str,
    amz_date: &str,
    canonical: &str,
) -> Result<String, BucketError> {
    let scope = format!("{}/{}/s3/aws4_request", date, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        sha256_hex(canonical.as_bytes())
    );
    let mut key = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    key = hmac_sha256(&key, region.as_bytes())?;
    key = hmac_sha256(&key, b"s3")?;
    key = hmac_sha256(&key, b"aws4_request")?;
    Ok(hex(&hmac_sha256(&key, string_to_sign.as_bytes())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn local_dir_upload_writes_the_object() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = Uploader::LocalDir(dir.path().to_path_buf());
        let (tx, rx) = unbounded();
        tx.send(b"hello ".to_vec()).unwrap();
        tx.send(b"world".to_vec()).unwrap();
        drop(tx);

        let location = uploader.upload(rx, "S1").unwrap();
        assert!(location.ends_with("S1.fastq.gz"));
        assert_eq!(fs::read(location).unwrap(), b"hello world");
    }

    #[test]
    fn uri_encoding() {
        assert_eq!(uri_encode("sample-1_A.01", false), "sample-1_A.01");
        assert_eq!(uri_encode("a b", false), "a%20b");
        assert_eq!(uri_encode("a/b", false), "a/b");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
    }

    // Known-answer test from the published SigV4 signing example: a GET of
    // /test.txt on examplebucket at 20130524T000000Z.
    #[test]
    fn signature_matches_reference_vector() {
        let payload_hash = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let headers = [
            ("host".to_string(), "examplebucket.s3.amazonaws.com".to_string()),
            ("range".to_string(), "bytes=0-9".to_string()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), "20130524T000000Z".to_string()),
        ];
        let (signed_headers, creq) =
            canonical_request("GET", "/test.txt", "", &headers, payload_hash);
        assert_eq!(signed_headers, "host;range;x-amz-content-sha256;x-amz-date");

        let signature = compute_signature(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20130524",
            "us-east-1",
            "20130524T000000Z",
            &creq,
        )
        .unwrap();
        assert_eq!(
            signature,
            "f0e8bdb87c964420e857bd35b5d6ed310bd44f0170aba48dd91039c6036bdb41"
        );
    }

    #[test]
    fn missing_credentials_fail_construction() {
        // run with a scrubbed env so the test is hermetic
        let saved_key = env::var(ACCESS_KEY_VAR).ok();
        let saved_secret = env::var(SECRET_KEY_VAR).ok();
        env::remove_var(ACCESS_KEY_VAR);
        env::remove_var(SECRET_KEY_VAR);

        assert!(matches!(
            Bucket::new("reads", "eu-west-2"),
            Err(BucketError::MissingCredential(var)) if var == ACCESS_KEY_VAR
        ));
        assert!(matches!(Bucket::new("", "eu-west-2"), Err(BucketError::NoName)));
        assert!(matches!(Bucket::new("reads", ""), Err(BucketError::NoRegion)));

        if let Some(v) = saved_key {
            env::set_var(ACCESS_KEY_VAR, v);
        }
        if let Some(v) = saved_secret {
            env::set_var(SECRET_KEY_VAR, v);
        }
    }
}
