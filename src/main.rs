mod app;
mod archive;
mod collect;
mod config;
mod local_logger;
mod logger;
mod merge;
mod prelude;
mod report;
mod rewriter;
mod transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let res = crate::app::run().await;
    if let Err(err) = res {
        local_logger::clean_logger();
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
