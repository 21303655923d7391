use std::process;

use reportpress::{
    application::{
        Generator,
        error::{AppError, GenerateError, error_chain},
    },
    config::{self, CheckArgs, GenerateArgs},
    domain::GenerationRequest,
    infra::telemetry,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let kind = error.kind().as_str();
    let causes = error_chain(error).join(": ");
    if dispatcher::has_been_set() {
        error!(kind, error = %error, causes = %causes, "generation failed");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(kind, error = %error, causes = %causes, "generation failed");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Generate(args) => run_generate(settings, *args).await,
        config::Command::Check(args) => run_check(settings, args).await,
    }
}

async fn run_generate(settings: config::Settings, args: GenerateArgs) -> Result<(), AppError> {
    let record = read_record(&args).await?;
    let request = GenerationRequest::new(record, args.output).map_err(GenerateError::from)?;

    let generator = Generator::with_chrome(settings);
    let outcome = generator.generate(request).await;

    if let Err(err) = generator.shutdown().await {
        warn!(
            target = "reportpress::cli",
            op = "shutdown",
            error = %err,
            "Render engine did not shut down cleanly"
        );
    }

    let report = outcome?;
    println!("{}", report.summary());
    Ok(())
}

async fn run_check(settings: config::Settings, _args: CheckArgs) -> Result<(), AppError> {
    let generator = Generator::with_chrome(settings);
    let warm = generator.warm_up().await.map_err(GenerateError::from)?;

    info!(
        target = "reportpress::cli",
        op = "check",
        pages = warm.templates.len(),
        assets = warm.assets.len(),
        "Configuration is usable"
    );
    for page in warm.templates.pages() {
        let styles = if page.page_styles.is_some() {
            " (+css)"
        } else {
            ""
        };
        println!("{:>4}  {}{styles}", page.index, page.name);
    }
    Ok(())
}

async fn read_record(args: &GenerateArgs) -> Result<serde_json::Value, AppError> {
    let raw = match (&args.input.data, &args.input.data_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .map_err(|err| AppError::input(format!("{}: {err}", path.display())))?,
        (None, None) => return Err(AppError::input("no data record given")),
    };

    serde_json::from_str(&raw).map_err(|err| AppError::input(format!("invalid JSON: {err}")))
}
