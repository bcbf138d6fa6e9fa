use anyhow::Result;
use tokio::time::{sleep, Duration};

use alphafuse::config::Config;
use alphafuse::logging::{json_log, now_ts, obj, v_num, v_str};
use alphafuse::pipeline::{ingest, run_cycle, run_reflection};
use alphafuse::venue::{NullFeed, VenueKind};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let venue_kind = VenueKind::from_env();
    let venue = venue_kind.build();
    // Paper outcomes mature after one full cycle.
    let settlement = venue_kind.build_settlement(cfg.cycle_secs as i64);
    let run_once = std::env::var("RUN_ONCE").is_ok();

    json_log(
        "main",
        obj(&[
            ("event", v_str("startup")),
            ("data_dir", v_str(&cfg.data_dir.display().to_string())),
            ("cycle_secs", v_num(cfg.cycle_secs as f64)),
            ("max_drawdown", v_num(cfg.max_drawdown)),
            ("confidence_threshold", v_num(cfg.confidence_threshold)),
        ]),
    );

    // No live collector ships with the paper venue; signals land in the
    // store via direct appends (operator notes, out-of-process scrapers).
    let feed = NullFeed;

    loop {
        if let Err(err) = ingest(&feed, &cfg).await {
            json_log(
                "main",
                obj(&[("event", v_str("ingestion_gap")), ("error", v_str(&format!("{:#}", err)))]),
            );
        }
        // A failed cycle leaves the prior snapshots untouched; log it and
        // let the next trigger retry from clean state.
        if let Err(err) = run_cycle(&cfg, venue.as_ref()).await {
            json_log(
                "main",
                obj(&[("event", v_str("cycle_error")), ("error", v_str(&format!("{:#}", err)))]),
            );
        }
        if let Err(err) = run_reflection(&cfg, settlement.as_ref()).await {
            json_log(
                "main",
                obj(&[
                    ("event", v_str("reflection_error")),
                    ("error", v_str(&format!("{:#}", err))),
                ]),
            );
        }

        if run_once {
            break;
        }
        let wait = cfg.sleep_until_next_cycle(now_ts());
        json_log(
            "main",
            obj(&[("event", v_str("sleeping")), ("seconds", v_num(wait as f64))]),
        );
        sleep(Duration::from_secs(wait)).await;
    }
    Ok(())
}
