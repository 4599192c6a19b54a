use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fs};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

const BINARIES: [&str; 3] = ["iolat", "memlat", "runqlat"];

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build and package the kernlat tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the collector binaries (eBPF + userspace)
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,

        /// Target architecture for cross-compilation (e.g., x86_64-unknown-linux-gnu, aarch64-unknown-linux-gnu)
        #[arg(long)]
        target: Option<String>,
    },

    /// Package the binaries for distribution
    Package {
        /// Target architecture
        #[arg(long)]
        target: Option<String>,

        /// Output directory
        #[arg(long, default_value = "dist")]
        output: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { release, target } => {
            build(release, target.as_deref())?;
        }
        Commands::Package { target, output } => {
            package(target.as_deref(), &output)?;
        }
    }

    Ok(())
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn binary_path(root: &Path, target: Option<&str>, profile: &str, name: &str) -> PathBuf {
    match target {
        Some(t) => root.join("target").join(t).join(profile).join(name),
        None => root.join("target").join(profile).join(name),
    }
}

fn build(release: bool, target: Option<&str>) -> Result<()> {
    let root = project_root();

    println!("Building kernlat tools...");

    // Cross-compiling to Linux from another host needs the `cross` tool.
    let is_cross_compile =
        target.map(|t| t.contains("linux")).unwrap_or(false) && !cfg!(target_os = "linux");

    let build_cmd = if is_cross_compile {
        if which::which("cross").is_ok() {
            println!("   Using 'cross' for cross-compilation");
            "cross"
        } else {
            bail!(
                "Cross-compilation to Linux requires 'cross' tool.\n\
                 Install with: cargo install cross\n\
                 Also requires Docker to be running."
            );
        }
    } else {
        "cargo"
    };

    let mut cmd = Command::new(build_cmd);
    cmd.current_dir(&root);
    cmd.arg("build");

    if release {
        cmd.arg("--release");
    }

    if let Some(t) = target {
        cmd.arg("--target").arg(t);
        println!("   Target: {}", t);
    }

    cmd.arg("-p").arg("kernlat");

    let status = cmd.status().context("Failed to run cargo build")?;

    if !status.success() {
        bail!("Build failed");
    }

    let profile = if release { "release" } else { "debug" };
    for name in BINARIES {
        let path = binary_path(&root, target, profile, name);
        println!("Built: {}", path.display());
    }

    Ok(())
}

fn package(target: Option<&str>, output_dir: &str) -> Result<()> {
    build(true, target)?;

    let root = project_root();
    let output_path = root.join(output_dir);

    fs::create_dir_all(&output_path).context("Failed to create output directory")?;

    let arch = target.unwrap_or(std::env::consts::ARCH);
    let version = env!("CARGO_PKG_VERSION");
    let package_name = format!("kernlat-{}-{}", version, arch);

    let package_dir = output_path.join(&package_name);
    fs::create_dir_all(&package_dir)?;

    for name in BINARIES {
        let path = binary_path(&root, target, "release", name);
        if !path.exists() {
            bail!("Binary not found at: {}", path.display());
        }
        fs::copy(&path, package_dir.join(name))?;
    }

    let tarball = output_path.join(format!("{}.tar.gz", package_name));

    let status = Command::new("tar")
        .current_dir(&output_path)
        .args(["-czf", &tarball.to_string_lossy(), &package_name])
        .status()
        .context("Failed to create tarball")?;

    if !status.success() {
        bail!("Failed to create tarball");
    }

    fs::remove_dir_all(&package_dir)?;

    println!("Package created: {}", tarball.display());

    Ok(())
}
