use crate::config::Config;
#[cfg(target_os = "linux")]
use crate::config::Action;
use crate::ebpf::maps::MapShape;
use crate::ebpf::{
    AttachController, DetachOutcome, LoadedProgram, MapPinner, MapStore, ObjectOpener,
    ProgramLoader, XdpLink,
};
use crate::{Result, XdpctlError};
use tracing::{error, info, warn};

/// Load the object, attach it and pin its maps
///
/// Once the program is attached, any later failure detaches it again
/// (guarded by its id) before the error is returned.
pub fn handle_load<O, S, P, L>(
    config: &Config,
    loader: &ProgramLoader<O, S>,
    pinner: &MapPinner<P>,
    controller: &mut AttachController<L>,
) -> Result<LoadedProgram>
where
    O: ObjectOpener,
    S: MapStore,
    P: MapStore,
    L: XdpLink,
{
    let loaded = loader.load(config)?;
    let ifindex = config.interface.index;

    controller.attach(ifindex, loaded.program(), config.xdp_flags)?;

    if let Err(e) = finish_load(config, &loaded, pinner) {
        error!("Post-attach step failed, detaching: {}", e);
        if let Err(detach_err) =
            controller.detach(ifindex, config.xdp_flags, loaded.program().id())
        {
            warn!(
                "Failed to detach program id {}: {}",
                loaded.program().id(),
                detach_err
            );
        }
        return Err(e);
    }

    Ok(loaded)
}

fn finish_load<P: MapStore>(
    config: &Config,
    loaded: &LoadedProgram,
    pinner: &MapPinner<P>,
) -> Result<()> {
    let map = loaded
        .map(&config.map_name)
        .ok_or_else(|| XdpctlError::MapNotFound(config.map_name.clone()))?;
    map.shape().verify(map.name(), &MapShape::stats_table())?;

    if !config.need_pin {
        return Ok(());
    }

    if loaded.reused_maps() {
        info!(
            "Maps reused from {}, leaving pins in place",
            config.pin_dir().display()
        );
        return Ok(());
    }

    pinner.pin_maps(&config.interface.name, loaded.maps())?;
    Ok(())
}

pub fn handle_unload<L: XdpLink>(
    config: &Config,
    controller: &mut AttachController<L>,
) -> Result<DetachOutcome> {
    controller.detach(
        config.interface.index,
        config.xdp_flags,
        config.expected_prog_id,
    )
}

#[cfg(target_os = "linux")]
async fn poll_stats(config: &Config, map: crate::ebpf::maps::MapHandle) -> Result<()> {
    use crate::ebpf::sys::CounterMap;
    use crate::metrics::{ReportWriter, StatsSampler};

    map.shape().verify(map.name(), &MapShape::stats_table())?;
    let counters = CounterMap::new(map)?;
    let writer = ReportWriter::stdout(config.stats.format);

    info!(
        "Collecting stats from {} every {:?}, Ctrl-C to stop",
        config.map_name, config.stats.interval
    );

    tokio::select! {
        _ = StatsSampler::new(counters).run(config.stats.interval, writer) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, stopping stats");
        }
    }

    Ok(())
}

#[cfg(target_os = "linux")]
pub async fn run(config: Config) -> Result<()> {
    use crate::ebpf::sys::{AyaObjectOpener, BpfFsStore, NetlinkXdp};

    let mut controller = AttachController::new(NetlinkXdp::new()?);
    let pinner = MapPinner::new(BpfFsStore, &config.pin_basedir);

    match config.action {
        Action::Unload => {
            if let DetachOutcome::Detached { prog_id } = handle_unload(&config, &mut controller)? {
                println!(
                    "Removed XDP program id {} from {}",
                    prog_id, config.interface.name
                );
            }
        }
        Action::StatsOnly => {
            let map = pinner.open_pinned(&config.interface.name, &config.map_name)?;
            poll_stats(&config, map).await?;
        }
        Action::Load => {
            let loader = ProgramLoader::new(AyaObjectOpener, BpfFsStore);
            let mut loaded = handle_load(&config, &loader, &pinner, &mut controller)?;

            println!(
                "Success: Loaded BPF-object({}) and used section({})",
                config.object_path.display(),
                loaded.section()
            );
            println!(
                " - XDP prog id:{} attached on device:{}(ifindex:{})",
                loaded.program().id(),
                config.interface.name,
                config.interface.index
            );

            if config.stats.enabled {
                let map = loaded
                    .take_map(&config.map_name)
                    .ok_or_else(|| XdpctlError::MapNotFound(config.map_name.clone()))?;
                poll_stats(&config, map).await?;
            }
        }
    }

    Ok(())
}
