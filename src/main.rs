use anyhow::Result;
use survey_coder::utils::logging;
use survey_coder::{App, Config, JobStatus};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    let outcome = App::initialize(config).await?.run().await?;

    if outcome.status == JobStatus::Failed {
        anyhow::bail!("作业失败: {}", outcome.message);
    }

    Ok(())
}
