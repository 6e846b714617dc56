use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match perimeter_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("data-perimeter: {}", e);
            ExitCode::FAILURE
        }
    }
}
