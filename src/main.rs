//! Host-side helper: `cargo run` builds the WASM bundle into `static/pkg` and
//! serves `static/` locally. Pass `--dev` for a debug bundle, which enables
//! `simulateWebGLContextLoss()` in the browser console.

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    use std::process::{Command, Stdio};

    use anyhow::{bail, Context};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let dev = std::env::args().any(|arg| arg == "--dev");
    let port = std::env::var("PORT").unwrap_or_else(|_| "8000".to_string());

    log::info!("building WASM pkg ({})", if dev { "dev" } else { "release" });
    let profile = if dev { "--dev" } else { "--release" };
    let status = Command::new("wasm-pack")
        .args(["build", profile, "--target", "web", "--out-dir", "static/pkg"])
        .status()
        .context("wasm-pack not found in PATH (https://rustwasm.github.io/wasm-pack/)")?;
    if !status.success() {
        bail!("wasm-pack finished with errors");
    }

    log::info!("serving static/ at http://127.0.0.1:{port}");
    let mut server = Command::new("python3")
        .args(["-m", "http.server", &port, "--directory", "static"])
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .context("failed to start http server")?;

    let status = server.wait().context("http server stopped unexpectedly")?;
    if !status.success() {
        bail!("http server exited with {status}");
    }
    Ok(())
}

// The bundle itself is the library; there is nothing to run on wasm32.
#[cfg(target_arch = "wasm32")]
fn main() {}
