use anyhow::{anyhow, Context, Result};
use fortressfinder::{
    AppConfig, BlockPos, CheckpointStore, ClusterResult, PatternType, ProgressReport,
    ResultStore, ScanCheckpoint, ScanKind, ScanSession, ScanSettings, ScanState,
    SyntheticOracleFactory, DEFAULT_CONFIG,
};
use log::info;
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread;
use std::time::Duration;

const PROGRESS_REFRESH_MS: u64 = 350;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse()?;
    if !ensure_config_exists(&args.config_path)? {
        println!(
            "已生成默认配置文件，请编辑后重新运行。\nDefault config created at {}. Please edit it and rerun.",
            args.config_path.display()
        );
        return Ok(());
    }

    let config_text = fs::read_to_string(&args.config_path).with_context(|| {
        format!(
            "无法读取配置 / Failed to read {}",
            args.config_path.display()
        )
    })?;
    let config: AppConfig = toml::from_str(&config_text).with_context(|| {
        format!(
            "无法解析配置 / Failed to parse {}",
            args.config_path.display()
        )
    })?;
    let settings = config
        .validate()
        .with_context(|| format!("配置无效 / Invalid config {}", args.config_path.display()))?;

    let checkpoint = CheckpointStore::new(
        resolve_output_path(&args.config_path, &config.output.state_file),
        resolve_output_path(&args.config_path, &config.output.results_file),
    );
    let (mut state, loaded) = checkpoint.load_or_default();
    let store = Arc::new(ResultStore::from_results(loaded));

    let mut dirty = false;
    if args.reset {
        info!("进度已重置 / area progress reset");
        state.area_cursor = 0;
        dirty = true;
    }
    if args.clear {
        let removed = store.clear_transient();
        info!("已清除 {removed} 条扫描结果 / cleared {removed} area results");
        dirty = true;
    }
    if let Some(target) = &args.delete {
        if store.remove(target) {
            info!(
                "已删除结果 / deleted seed {} at {}",
                target.seed(),
                target.teleport_command()
            );
        } else {
            info!("没有可删除的结果 / no matching area result to delete");
        }
        dirty = true;
    }
    if align_area_cursor(&mut state, &settings) {
        dirty = true;
    }
    if dirty {
        state.settings = settings.persisted();
        checkpoint
            .save(&state, &store.snapshot())
            .context("无法保存状态 / Failed to save scan state")?;
    }

    if args.report || args.delete.is_some() {
        print_results(&store, config.output.show_per_pattern);
        return Ok(());
    }
    run_scan(&config, settings, state, store, checkpoint)
}

/// Restart the area cursor when it counts rows of another seed or radius.
/// Returns true when the state changed and should be saved.
fn align_area_cursor(state: &mut ScanCheckpoint, settings: &ScanSettings) -> bool {
    if settings.kind != ScanKind::Area || state.area_matches(settings.seed, settings.radius) {
        return false;
    }
    if state.area_radius != 0 {
        info!(
            "种子或半径已改变，从头扫描 / seed or radius changed, restarting area scan ({} r={} → {} r={})",
            state.area_seed, state.area_radius, settings.seed, settings.radius
        );
    }
    state.restart_area(settings.seed, settings.radius);
    true
}

fn run_scan(
    config: &AppConfig,
    settings: ScanSettings,
    state: ScanCheckpoint,
    store: Arc<ResultStore>,
    checkpoint: CheckpointStore,
) -> Result<()> {
    let factory = Arc::new(SyntheticOracleFactory::for_version(&config.oracle.version)?);
    match settings.kind {
        ScanKind::Area => println!(
            "区域扫描 / Area scan: seed {} radius {} ({} threads, 生成器 oracle {})",
            settings.seed_text,
            settings.radius,
            settings.threads,
            factory.version()
        ),
        ScanKind::Sweep => println!(
            "种子搜索 / Seed sweep: from {} within {} blocks ({} threads, 生成器 oracle {})",
            state.next_seed,
            settings.sweep_radius_blocks,
            settings.threads,
            factory.version()
        ),
    }
    println!("命令 / Commands: p = 暂停 pause, r = 继续 resume, q = 停止 stop");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("无法注册 Ctrl+C / Failed to install Ctrl+C handler")?;
    }
    let commands = spawn_command_reader();

    let handle = ScanSession::start(factory, settings, state, Arc::clone(&store), Some(checkpoint))?;
    while !handle.is_finished() {
        if stop.load(Ordering::Relaxed) {
            handle.cancel();
        }
        while let Ok(cmd) = commands.try_recv() {
            match cmd {
                Command::Pause => {
                    handle.pause();
                }
                Command::Resume => {
                    handle.resume();
                }
                Command::Stop => {
                    handle.cancel();
                }
            }
        }
        print!("\r{}", format_progress_line(&handle.report()));
        let _ = io::stdout().flush();
        thread::sleep(Duration::from_millis(PROGRESS_REFRESH_MS));
    }
    println!("\r{}", format_progress_line(&handle.report()));

    let outcome = handle.wait();
    match &outcome.state {
        ScanState::Completed => println!("扫描完成 / Scan completed."),
        ScanState::Cancelled => println!(
            "扫描已停止，进度已保存 / Scan stopped, progress saved at {}.",
            outcome.cursor
        ),
        ScanState::Faulted(reason) => {
            println!("扫描失败 / Scan faulted: {reason}");
        }
        other => println!("扫描结束 / Scan ended: {}", other.label()),
    }
    print_results(&store, config.output.show_per_pattern);
    if let ScanState::Faulted(reason) = outcome.state {
        return Err(anyhow!("生成器故障 / oracle fault: {reason}"));
    }
    Ok(())
}

enum Command {
    Pause,
    Resume,
    Stop,
}

fn spawn_command_reader() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let cmd = match line.trim() {
                "p" => Command::Pause,
                "r" => Command::Resume,
                "q" => Command::Stop,
                _ => continue,
            };
            if tx.send(cmd).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_results(store: &ResultStore, per_pattern: usize) {
    store.sort_by_distance(true);
    println!("结果总数 / Results: {}", store.len());
    for pattern in PatternType::ALL {
        let (shown, total) = store.by_pattern(pattern, per_pattern);
        if total == 0 {
            continue;
        }
        println!("\n{} [{}] ({})", pattern.name(), pattern.code(), total);
        for r in &shown {
            let c = r.center();
            println!(
                "  seed {:>20} | ({}, {}, {}) | 距离 dist {:>6} | {}",
                r.seed(),
                c.x,
                c.y,
                c.z,
                r.distance(),
                r.teleport_command()
            );
        }
        if total > shown.len() {
            println!("  ... 另有 {} 条 / {} more", total - shown.len(), total - shown.len());
        }
    }
}

fn ensure_config_exists(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(true);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("无法创建目录 / Failed to create {}", parent.display()))?;
        }
    }
    fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("无法写入配置 / Failed to write {}", path.display()))?;
    Ok(false)
}

#[derive(Debug)]
struct CliArgs {
    config_path: PathBuf,
    reset: bool,
    clear: bool,
    report: bool,
    delete: Option<ClusterResult>,
}

impl CliArgs {
    fn parse() -> Result<Self> {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let mut parsed = Self {
            config_path: PathBuf::from("fortressfinder.toml"),
            reset: false,
            clear: false,
            report: false,
            delete: None,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    let value = args.next().ok_or_else(|| {
                        anyhow!("--config 需要文件路径 / missing path after --config")
                    })?;
                    parsed.config_path = PathBuf::from(value);
                }
                "--reset" => parsed.reset = true,
                "--clear" => parsed.clear = true,
                "--report" => parsed.report = true,
                "--delete" => {
                    let fields: Vec<String> = args.by_ref().take(5).collect();
                    parsed.delete = Some(parse_delete(&fields)?);
                }
                "-h" | "--help" => {
                    print_usage();
                    process::exit(0);
                }
                unknown => {
                    return Err(anyhow!("未知参数 / Unknown argument: {}", unknown));
                }
            }
        }
        Ok(parsed)
    }
}

/// `<seed> <x> <y> <z> <pattern-code>` as printed by `--report`.
fn parse_delete(fields: &[String]) -> Result<ClusterResult> {
    let [seed, x, y, z, code] = fields else {
        return Err(anyhow!(
            "--delete 需要 5 个值 / --delete needs <seed> <x> <y> <z> <pattern-code>"
        ));
    };
    let number = |name: &str, text: &str| -> Result<i64> {
        text.trim()
            .parse::<i64>()
            .with_context(|| format!("--delete {name} 无效 / invalid {name}: {text}"))
    };
    let coord = |name: &str, text: &str| -> Result<i32> {
        let value = number(name, text)?;
        i32::try_from(value)
            .map_err(|_| anyhow!("--delete {name} 超出范围 / {name} out of range: {value}"))
    };
    let code = number("pattern", code)?;
    let pattern = u8::try_from(code)
        .ok()
        .and_then(PatternType::from_code)
        .ok_or_else(|| anyhow!("未知形状代码 / unknown pattern code: {code}"))?;
    let center = BlockPos::new(coord("x", x)?, coord("y", y)?, coord("z", z)?);
    Ok(ClusterResult::new(number("seed", seed)?, center, pattern, false))
}

fn print_usage() {
    println!(
        "Fortressfinder (Rust)\n\
        用法 Usage:\n  fortressfinder [--config fortressfinder.toml] [--reset] [--clear] [--report]\n  \
        fortressfinder --delete <seed> <x> <y> <z> <pattern-code>\n\n\
        --config, -c  指定配置文件 / specify config file\n\
        --reset       区域进度归零 / restart the area scan from the first row\n\
        --clear       删除区域扫描结果 / drop area-scan results, keep sweep finds\n\
        --report      只显示已保存结果 / list saved results without scanning\n\
        --delete      删除一条区域结果 / delete one area result (center + pattern code)\n\
        --help, -h    显示帮助 / show help"
    );
}

fn resolve_output_path(config_path: &Path, output: &str) -> PathBuf {
    let out_path = Path::new(output);
    if out_path.is_absolute() {
        out_path.to_path_buf()
    } else {
        config_path
            .parent()
            .map(|p| {
                if p.as_os_str().is_empty() {
                    Path::new(".").to_path_buf()
                } else {
                    p.to_path_buf()
                }
            })
            .unwrap_or_else(|| PathBuf::from("."))
            .join(out_path)
    }
}

fn format_progress_line(report: &ProgressReport) -> String {
    let elapsed = format_duration(report.elapsed);
    let remaining = report
        .throughput
        .eta
        .map(format_duration)
        .unwrap_or_else(|| "--:--:--".to_string());
    let status = match report.state {
        ScanState::Paused => " [已暂停 paused]",
        _ => "",
    };
    match (report.kind, report.total_units) {
        (ScanKind::Sweep, Some(total)) if total > 0 => {
            let done = (report.cursor - report.start).clamp(0, total as i64) as u64;
            format!(
                "{:>6.2}% | 种子 seed: {} | 速度 speed: {:>10.2} cells/s | 结果 results: {} | 已用 elapsed: {} | 剩余 remaining: {}{}",
                done as f64 / total as f64 * 100.0,
                report.cursor,
                report.throughput.cells_per_sec,
                report.results.len(),
                elapsed,
                remaining,
                status
            )
        }
        (ScanKind::Area, Some(total)) if total > 0 => {
            let done = report.cursor.clamp(0, total as i64) as u64;
            format!(
                "{:>6.2}% | 速度 speed: {:>10.2} cells/s | 结果 results: {} | 行 rows: {}/{} | 已用 elapsed: {} | 剩余 remaining: {}{}",
                done as f64 / total as f64 * 100.0,
                report.throughput.cells_per_sec,
                report.results.len(),
                done,
                total,
                elapsed,
                remaining,
                status
            )
        }
        _ => format!(
            "种子 seed: {} | 本次 checked: {} | 速度 speed: {:>10.2} cells/s | 结果 results: {} | 已用 elapsed: {}{}",
            report.cursor,
            report.seeds_checked,
            report.throughput.cells_per_sec,
            report.results.len(),
            elapsed,
            status
        ),
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn area_cursor_survives_a_sweep_but_not_a_new_seed() {
        let first = ScanSettings::area("1", 20, 2).unwrap();
        let mut state = ScanCheckpoint {
            area_cursor: 7,
            area_seed: 1,
            area_radius: 20,
            settings: first.persisted(),
            ..ScanCheckpoint::default()
        };
        assert!(!align_area_cursor(&mut state, &first));

        // A sweep run rewrites the settings block but not the area fields.
        let sweep = ScanSettings::sweep(500, None, 2).unwrap();
        state.settings = sweep.persisted();
        state.next_seed = 40;
        assert!(!align_area_cursor(&mut state, &sweep));
        assert_eq!(state.area_cursor, 7);

        let second = ScanSettings::area("2", 20, 2).unwrap();
        assert!(align_area_cursor(&mut state, &second));
        assert_eq!(state.area_cursor, 0);
        assert_eq!((state.area_seed, state.area_radius), (2, 20));
        assert_eq!(state.next_seed, 40);

        let wider = ScanSettings::area("2", 21, 2).unwrap();
        state.area_cursor = 5;
        assert!(align_area_cursor(&mut state, &wider));
        assert_eq!(state.area_cursor, 0);
    }

    #[test]
    fn fresh_state_is_bound_to_the_configured_area() {
        let settings = ScanSettings::area("-9", 3, 1).unwrap();
        let mut state = ScanCheckpoint::default();
        assert!(align_area_cursor(&mut state, &settings));
        assert!(state.area_matches(-9, 3));
        assert_eq!(state.area_cursor, 0);
    }

    #[test]
    fn delete_takes_seed_center_and_pattern_code() {
        let args = CliArgs::parse_from(strings(&["--delete", "-42", "9", "64", "-10", "1"]));
        let target = args.unwrap().delete.unwrap();
        assert_eq!(target.seed(), -42);
        assert_eq!(target.center(), BlockPos::new(9, 64, -10));
        assert_eq!(target.pattern(), PatternType::TShape);
        assert!(!target.is_permanent());

        assert!(CliArgs::parse_from(strings(&["--delete", "1", "2", "3"])).is_err());
        assert!(CliArgs::parse_from(strings(&["--delete", "1", "2", "3", "4", "99"])).is_err());
        assert!(CliArgs::parse_from(strings(&["--delete", "1", "x", "3", "4", "0"])).is_err());
        assert!(
            CliArgs::parse_from(strings(&["--delete", "1", "3000000000", "3", "4", "0"])).is_err()
        );
    }

    #[test]
    fn bounded_sweep_progress_shows_a_percentage() {
        let report = ProgressReport {
            state: ScanState::Running,
            kind: ScanKind::Sweep,
            start: 100,
            cursor: 125,
            end: Some(200),
            total_units: Some(100),
            busy_workers: 1,
            cells_evaluated: 0,
            seeds_checked: 25,
            elapsed: Duration::from_secs(1),
            throughput: fortressfinder::Throughput {
                cells_per_sec: 0.0,
                eta: None,
            },
            results: Vec::new(),
            checkpoint_failures: 0,
        };
        let line = format_progress_line(&report);
        assert!(line.starts_with(" 25.00%"), "{line}");
        assert!(line.contains("seed: 125"));
    }
}
