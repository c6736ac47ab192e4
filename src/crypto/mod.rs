//! Optional encryption of the packaged acquisition.
//!
//! The container format is exactly what `openssl enc -aes-256-cbc -pbkdf2`
//! produces, so an analyst can decrypt without this tool:
//!
//! ```text
//! openssl enc -d -aes-256-cbc -pbkdf2 -in ws1.tar.gz.enc -out ws1.tar.gz \
//!     -pass file:shadowfax.key
//! ```
//!
//! Layout: `Salted__` ‖ 8-byte salt ‖ AES-256-CBC ciphertext (PKCS#7).
//! Key and IV are the first 32 and next 16 bytes of
//! PBKDF2-HMAC-SHA256(passphrase, salt, 10000 iterations).

pub mod credentials;

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use log::{info, warn};
use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use openssl::rand::rand_bytes;
use openssl::symm::{Cipher, Crypter, Mode};

use crate::constants::{
    CIPHER_CHUNK_SIZE, ENCRYPTED_EXTENSION, GENERATED_KEY_SIZE, KEY_FILE_NAME, OPENSSL_SALT_MAGIC,
    PARTIAL_SUFFIX, PBKDF2_ITERATIONS, SALT_SIZE,
};
use crate::error::GandalfError;
use crate::models::EncryptionMethod;

pub use credentials::{CredentialProvider, Passphrase, StaticCredentials, StdinSecret, TerminalPrompt};

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// What the encrypt step left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionOutcome {
    /// The file to hand off: the `.enc` container, or the archive for `None`
    pub package: PathBuf,
    /// Generated key file (`Key` mode only)
    pub key_file: Option<PathBuf>,
}

/// `<archive>.enc`
pub fn encrypted_path(archive: &Path) -> PathBuf {
    append_extension(archive, ENCRYPTED_EXTENSION)
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Encrypt `archive` according to `method`.
///
/// On success the plaintext archive is removed. On any failure it is left
/// in place and named in the returned [`GandalfError::Encryption`], and a
/// key generated by this call is removed again.
pub fn encrypt(
    archive: &Path,
    method: EncryptionMethod,
    credentials: &dyn CredentialProvider,
) -> Result<EncryptionOutcome, GandalfError> {
    let fail = |cause: anyhow::Error| GandalfError::Encryption { retained: archive.to_path_buf(), cause };

    let target = encrypted_path(archive);
    if method != EncryptionMethod::None && target.exists() {
        return Err(fail(anyhow!("{} already exists; refusing to overwrite", target.display())));
    }

    let (passphrase, key_file) = match method {
        EncryptionMethod::None => {
            return Ok(EncryptionOutcome { package: archive.to_path_buf(), key_file: None });
        }
        EncryptionMethod::Password => (credentials.passphrase().map_err(fail)?, None),
        EncryptionMethod::Key => {
            let dir = archive.parent().unwrap_or_else(|| Path::new("."));
            let key_path = dir.join(KEY_FILE_NAME);
            let secret = write_generated_key(&key_path).map_err(fail)?;
            (secret, Some(key_path))
        }
    };

    let partial = append_extension(&target, PARTIAL_SUFFIX);
    // a key without its container only blocks the next Key run
    let abort = |cause: anyhow::Error| {
        let _ = fs::remove_file(&partial);
        if let Some(key) = &key_file {
            let _ = fs::remove_file(key);
        }
        fail(cause)
    };

    if let Err(e) = encrypt_file(archive, &partial, passphrase.expose()) {
        return Err(abort(e));
    }
    if let Err(e) = fs::rename(&partial, &target) {
        return Err(abort(anyhow!(e).context("Failed to finalize encrypted container")));
    }

    if let Err(e) = fs::remove_file(archive) {
        warn!("Encrypted container written but plaintext {} could not be removed: {}", archive.display(), e);
    }

    info!("Encrypted {} ({})", target.display(), method);
    if let Some(key) = &key_file {
        warn!("Key file {} is the only way to decrypt this acquisition; keep it safe", key.display());
    }

    Ok(EncryptionOutcome { package: target, key_file })
}

/// Generate a random key, store its base64 form in `path` (mode 0600) and
/// return that text as the passphrase.
///
/// An existing key file is never overwritten: it may be the only route to
/// an earlier acquisition.
pub fn write_generated_key(path: &Path) -> Result<Passphrase> {
    let mut raw = [0u8; GENERATED_KEY_SIZE];
    rand_bytes(&mut raw).context("Failed to generate key material")?;
    let encoded = Passphrase::from(general_purpose::STANDARD.encode(raw));
    raw.iter_mut().for_each(|b| *b = 0);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .context(format!("Refusing to create key file {}", path.display()))?;
    file.write_all(encoded.expose())?;
    file.write_all(b"\n")?;
    file.sync_all().context("Failed to sync key file")?;

    Ok(encoded)
}

/// First line of a key file, as `openssl enc -pass file:` reads it.
pub fn read_key_file(path: &Path) -> Result<Passphrase> {
    let contents = fs::read(path).context(format!("Failed to read key file {}", path.display()))?;
    let line_end = contents.iter().position(|&b| b == b'\n').unwrap_or(contents.len());
    let mut line = contents[..line_end].to_vec();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    if line.is_empty() {
        bail!("key file {} is empty", path.display());
    }
    Ok(Passphrase::new(line))
}

fn derive_key_iv(passphrase: &[u8], salt: &[u8]) -> Result<([u8; KEY_LEN], [u8; IV_LEN])> {
    let mut derived = [0u8; KEY_LEN + IV_LEN];
    pbkdf2_hmac(passphrase, salt, PBKDF2_ITERATIONS, MessageDigest::sha256(), &mut derived)
        .context("Key derivation failed")?;

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..]);
    derived.iter_mut().for_each(|b| *b = 0);
    Ok((key, iv))
}

/// Encrypt `input` into `output` in OpenSSL salted format.
pub fn encrypt_file(input: &Path, output: &Path, passphrase: &[u8]) -> Result<()> {
    let mut salt = [0u8; SALT_SIZE];
    rand_bytes(&mut salt).context("Failed to generate salt")?;
    let (key, iv) = derive_key_iv(passphrase, &salt)?;

    let reader = File::open(input).context(format!("Failed to open {}", input.display()))?;
    let out = File::create(output).context(format!("Failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(out);

    writer.write_all(OPENSSL_SALT_MAGIC)?;
    writer.write_all(&salt)?;

    let crypter = Crypter::new(Cipher::aes_256_cbc(), Mode::Encrypt, &key, Some(&iv))
        .context("Failed to initialise cipher")?;
    stream_cipher(crypter, BufReader::new(reader), &mut writer)?;

    let out = writer.into_inner().map_err(|e| anyhow!("Failed to flush {}: {}", output.display(), e))?;
    out.sync_all().context("Failed to sync encrypted container")?;
    Ok(())
}

/// Decrypt an OpenSSL salted container produced by [`encrypt_file`].
pub fn decrypt_file(input: &Path, output: &Path, passphrase: &[u8]) -> Result<()> {
    let mut reader = BufReader::new(File::open(input).context(format!("Failed to open {}", input.display()))?);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).context("Container too short")?;
    if &magic != OPENSSL_SALT_MAGIC {
        bail!("{} is not an OpenSSL salted container", input.display());
    }
    let mut salt = [0u8; SALT_SIZE];
    reader.read_exact(&mut salt).context("Container too short")?;
    let (key, iv) = derive_key_iv(passphrase, &salt)?;

    let mut writer = BufWriter::new(File::create(output).context(format!("Failed to create {}", output.display()))?);
    let crypter = Crypter::new(Cipher::aes_256_cbc(), Mode::Decrypt, &key, Some(&iv))
        .context("Failed to initialise cipher")?;
    stream_cipher(crypter, reader, &mut writer).context("Decryption failed (wrong passphrase?)")?;
    writer.flush()?;
    Ok(())
}

fn stream_cipher<R: Read, W: Write>(mut crypter: Crypter, mut reader: R, writer: &mut W) -> Result<()> {
    let block_size = Cipher::aes_256_cbc().block_size();
    let mut input = vec![0u8; CIPHER_CHUNK_SIZE];
    let mut output = vec![0u8; CIPHER_CHUNK_SIZE + block_size];

    loop {
        let read = reader.read(&mut input).context("Failed to read input")?;
        if read == 0 {
            break;
        }
        let count = crypter.update(&input[..read], &mut output)?;
        writer.write_all(&output[..count])?;
    }

    let count = crypter.finalize(&mut output)?;
    writer.write_all(&output[..count])?;
    Ok(())
}
