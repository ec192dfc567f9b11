use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use sequoia_openpgp as openpgp;
use openpgp::Result;
use openpgp::cert::prelude::*;
use openpgp::serialize::SerializeInto;

/// Returns a command importing into a fresh cert-d below `dir`.
fn sq_import(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sq-import").expect("binary exists");
    cmd.env_remove("PGP_CERT_D")
        .env_remove("RUST_LOG")
        .arg("--home").arg(dir.join("home"))
        .arg("--config").arg(dir.join("import.toml"))
        .arg("--cert-store").arg(dir.join("cert.d"))
        .arg("--batch");
    cmd
}

fn generate(dir: &Path, name: &str) -> Result<(Cert, String)> {
    let (cert, _) = CertBuilder::general_purpose(
        Some(format!("<{}@example.org>", name)))
        .generate()?;
    let path = dir.join(format!("{}.pgp", name));
    std::fs::write(&path, cert.armored().to_vec()?)?;
    Ok((cert, path.display().to_string()))
}

#[test]
fn import_then_reimport() -> Result<()> {
    let dir = TempDir::new()?;
    let (_, alice) = generate(dir.path(), "alice")?;

    sq_import(dir.path())
        .arg(&alice)
        .assert()
        .success()
        .stderr(predicate::str::contains("Detailed results of importing"))
        .stderr(predicate::str::contains("Imported: 1"));

    sq_import(dir.path())
        .arg(&alice)
        .assert()
        .success()
        .stderr(predicate::str::contains("Imported: 0"))
        .stderr(predicate::str::contains("Unchanged: 1"));
    Ok(())
}

#[test]
fn several_files_show_totals() -> Result<()> {
    let dir = TempDir::new()?;
    let (_, alice) = generate(dir.path(), "alice")?;
    let (_, bob) = generate(dir.path(), "bob")?;

    sq_import(dir.path())
        .args([&alice, &bob])
        .assert()
        .success()
        .stderr(predicate::str::contains("Totals"))
        .stderr(predicate::str::contains("Total number processed: 2"))
        .stderr(predicate::str::contains("Imported: 2"));
    Ok(())
}

#[test]
fn import_from_stdin() -> Result<()> {
    let dir = TempDir::new()?;
    let (cert, _) = generate(dir.path(), "carol")?;

    sq_import(dir.path())
        .arg("-")
        .write_stdin(cert.to_vec()?)
        .assert()
        .success()
        .stderr(predicate::str::contains("Imported: 1"));
    Ok(())
}

#[test]
fn secret_keys_are_counted() -> Result<()> {
    let dir = TempDir::new()?;
    let (key, _) = CertBuilder::new()
        .add_userid("<dave@example.org>")
        .generate()?;
    let path = dir.path().join("dave.key");
    std::fs::write(&path, key.as_tsk().armored().to_vec()?)?;

    sq_import(dir.path())
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("Secret keys processed: 1"))
        .stderr(predicate::str::contains("Secret keys not imported: 1"))
        .stderr(predicate::str::contains("sq key import"));
    Ok(())
}

#[test]
fn missing_files_fail() -> Result<()> {
    let dir = TempDir::new()?;
    let (_, alice) = generate(dir.path(), "alice")?;
    let missing = dir.path().join("missing.pgp").display().to_string();

    sq_import(dir.path())
        .args([&alice, &missing])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("import failed:"))
        .stderr(predicate::str::contains("missing.pgp"))
        .stderr(predicate::str::contains("Imported: 1"));
    Ok(())
}

#[test]
fn smime_is_not_supported() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("bob.pem");
    std::fs::write(&path, "-----BEGIN CERTIFICATE-----\n")?;

    sq_import(dir.path())
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("S/MIME"))
        .stderr(predicate::str::contains("supported"));
    Ok(())
}

#[test]
fn groups_are_imported() -> Result<()> {
    let dir = TempDir::new()?;
    let (cert, _) = generate(dir.path(), "erin")?;

    let mut bundle = format!("\
[[group]]
id = \"release\"
name = \"Release signers\"
members = [ \"{}\" ]

", cert.fingerprint()).into_bytes();
    bundle.extend(cert.armored().to_vec()?);
    let path = dir.path().join("group.pgp");
    std::fs::write(&path, bundle)?;

    sq_import(dir.path())
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("Imported: 1"))
        .stderr(predicate::str::contains("new group"));

    let groups = std::fs::read_to_string(
        dir.path().join("cert.d-groups.toml"))?;
    assert!(groups.contains("Release signers"));
    Ok(())
}

#[test]
fn help() {
    Command::cargo_bin("sq-import").expect("binary exists")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--retrieve-signer-keys"));
}

#[test]
fn bad_configuration() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(dir.path().join("import.toml"), "[import]\nfoo = 1\n")?;
    let (_, alice) = generate(dir.path(), "alice")?;

    sq_import(dir.path())
        .arg(&alice)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("import.toml"));
    Ok(())
}
