//! DAMA simulation for SatDama

use anyhow::Result;
use colored::Colorize;
use satdama_sim::{scenarios, SimulationPresets};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("{}", "SatDama Return Link Simulation".bright_blue().bold());
    println!("{}", "==============================".bright_blue());

    let test_scenarios = vec![
        ("Clear Sky", SimulationPresets::clear_sky()),
        ("Rain Fade", SimulationPresets::rain_fade()),
        ("Congested Carrier", SimulationPresets::congested()),
    ];

    for (name, config) in test_scenarios {
        println!(
            "\n{} terminals, {} superframes of {} ms, C/N {:.1} dB",
            config.terminals, config.superframes, config.dama.frame_duration_ms, config.link.mean_cni_db
        );
        let report = scenarios::run(config).await?;
        scenarios::print_report(name, &report);
        println!("{}", "-".repeat(50));
    }

    println!("\n{}", "All simulations complete!".bright_green().bold());
    Ok(())
}
