//! Reading the per-action counter table

use super::map_io_error;
use crate::ebpf::maps::{map_type, MapHandle, MapShape};
use crate::metrics::CounterSource;
use crate::{Result, XdpctlError};
use aya::maps::{Array, Map, MapData, PerCpuArray};
use std::io;
use xdpctl_common::DataRec;

enum Table {
    Shared(Array<MapData, DataRec>),
    PerCpu(PerCpuArray<MapData, DataRec>),
}

/// Counter table backed by a kernel array or per-CPU array
pub struct CounterMap {
    name: String,
    table: Table,
}

impl CounterMap {
    pub fn new(map: MapHandle) -> Result<Self> {
        map.shape().verify(map.name(), &MapShape::stats_table())?;

        let per_cpu = match map.shape().map_type {
            map_type::ARRAY => false,
            map_type::PERCPU_ARRAY => true,
            other => return Err(XdpctlError::UnsupportedMapType(other)),
        };

        let name = map.name().to_string();
        let data = map.into_map_data().map_err(map_io_error)?;
        let map = Map::from_map_data(data).map_err(map_io_error)?;
        let table = if per_cpu {
            Table::PerCpu(PerCpuArray::try_from(map).map_err(map_io_error)?)
        } else {
            Table::Shared(Array::try_from(map).map_err(map_io_error)?)
        };

        Ok(Self { name, table })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl CounterSource for CounterMap {
    fn read(&mut self, action: u32) -> io::Result<u64> {
        match &self.table {
            Table::Shared(array) => array
                .get(&action, 0)
                .map(|rec| rec.rx_packets)
                .map_err(map_io_error),
            Table::PerCpu(array) => array
                .get(&action, 0)
                .map(|values| rx_packets(values.iter()))
                .map_err(map_io_error),
        }
    }
}

/// Sum of one slot across CPUs
fn rx_packets<'a>(values: impl IntoIterator<Item = &'a DataRec>) -> u64 {
    values
        .into_iter()
        .fold(0u64, |total, rec| total.wrapping_add(rec.rx_packets))
}
