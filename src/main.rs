use futures::StreamExt;
use subscription_manager_lib::run;

#[tokio::main]
async fn main() {
    let state = match run().await {
        Ok(state) => state,
        Err(e) => {
            eprintln!("アプリケーションの起動に失敗しました: {}", e.user_message());
            log::log!(e.severity().log_level(), "起動失敗: {}", e.details());
            std::process::exit(1);
        }
    };

    let mut summaries = state.subscription_service.observe_summary();
    if let Some(summary) = summaries.next().await {
        log::info!(
            "サブスクリプション: count={}, monthly_total={:.0}",
            summary.subscriptions.len(),
            summary.monthly_total
        );
    }
    drop(summaries);

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("終了シグナルの待機に失敗しました: {e}");
    }
    state.shutdown().await;
}
