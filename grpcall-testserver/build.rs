use std::process::Command;

const PROTO_DIR: &str = "proto";
const PROTOS: &[&str] = &["proto/echo.proto"];

/// `PROTOC` wins; otherwise `protoc` must answer `--version` from PATH.
fn check_protoc() -> Result<(), String> {
    if std::env::var_os("PROTOC").is_some_and(|v| !v.is_empty()) {
        return Ok(());
    }
    let out = Command::new("protoc")
        .arg("--version")
        .output()
        .map_err(|e| format!("protoc not found on PATH: {e}"))?;
    if out.status.success() {
        Ok(())
    } else {
        Err(format!(
            "'protoc --version' exited with {:?}: {}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr).trim()
        ))
    }
}

fn main() {
    println!("cargo:rerun-if-changed={PROTO_DIR}");
    println!("cargo:rerun-if-env-changed=PROTOC");

    if let Err(reason) = check_protoc() {
        panic!(
            "grpcall-testserver needs a protobuf compiler ({reason}); install protoc or set PROTOC"
        );
    }

    // Server stubs only.
    if let Err(e) = tonic_prost_build::configure()
        .build_client(false)
        .compile_protos(PROTOS, &[PROTO_DIR])
    {
        panic!("compiling {PROTOS:?}: {e}");
    }
}
