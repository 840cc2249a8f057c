use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    ExitCode::from(entityd_runtime::bootstrap::run(argv).await)
}
