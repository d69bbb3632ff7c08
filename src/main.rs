use std::env;
use std::net::TcpListener;
use std::path::PathBuf;

use repcount::anim::Animation;
use repcount::counter::Thresholds;
use repcount::detector::OnnxPoseEstimator;
use repcount::server;
use repcount::session;

fn main() -> anyhow::Result<()> {
    repcount::init_logger!();

    let estimator = OnnxPoseEstimator::from_env()?;

    // With a path argument, process the recording in batch mode; otherwise serve live sessions.
    match env::args_os().nth(1) {
        Some(path) => batch(PathBuf::from(path), estimator),
        None => {
            let addr = env::var("REPCOUNT_ADDR").unwrap_or_else(|_| "0.0.0.0:9944".into());
            let listener = TcpListener::bind(&addr)?;
            server::serve(listener, Thresholds::PULL_UPS, move || Ok(estimator.clone()))
        }
    }
}

fn batch(path: PathBuf, mut estimator: OnnxPoseEstimator) -> anyhow::Result<()> {
    let animation = Animation::from_path(&path)?;
    let out = path.with_extension("annotated.gif");

    let report = session::process_animation(
        &mut estimator,
        &animation,
        Thresholds::PULL_UPS,
        Some(&out),
    )?;

    println!(
        "{} repetitions in {} frames ({} with a detected pose); annotated copy at {}",
        report.total_reps,
        report.frames,
        report.detected_frames,
        out.display(),
    );
    Ok(())
}
