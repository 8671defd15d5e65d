use research_datahub::config::Config;
use research_datahub::data_provider::PulledDataProvider;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // 创建数据提供者
    let provider = PulledDataProvider::load(config.data_dir())?;
    if !provider.has_stock_data() {
        println!("No CRSP snapshot; run `cargo run --bin pull_crsp_stock` first");
        return Ok(());
    }

    // 获取最新交易日期
    if let Some(latest_date) = provider.get_latest_trading_date() {
        println!("最新交易日期: {}", latest_date);
    }

    // Apple
    let permno = 14593;
    let history = provider.get_stock_history(permno);
    println!("\nPERMNO {}: {} daily rows", permno, history.len());

    println!("{:<12} {:<10} {:<16} {:<10} {:<8}",
             "Date", "Price", "Market cap", "Return", "VIX");
    println!("{:-<60}", "");

    for record in history.iter().rev().take(5) {
        let vix = provider.get_vix_on(&record.date)
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "-".to_string());
        println!("{:<12} {:<10.2} {:<16.0} {:<10.4} {:<8}",
                 record.date.to_string(),
                 record.prc.map(f64::abs).unwrap_or(f64::NAN),
                 record.market_cap().unwrap_or(f64::NAN),
                 record.ret.unwrap_or(f64::NAN),
                 vix);
    }

    println!("\nSecurities: {}", provider.get_permnos().len());
    println!("VIX observations: {}", provider.get_vix_observations().len());

    Ok(())
}
