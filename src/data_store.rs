//! Server-side data store
//!
//! Four fixed-capacity tables (coils, discrete inputs, holding registers,
//! input registers) behind a single mutex, so a multi-register write is
//! never observed half done. Addresses are 0-based offsets into each table.
//!
//! Discrete inputs and input registers are read-only over Modbus but can be
//! written by the application to simulate a device.

use std::sync::{Mutex, MutexGuard};

use crate::constants::DEFAULT_TABLE_SIZE;
use crate::error::{ModbusError, ModbusResult};

#[derive(Debug)]
struct Tables {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

/// Thread-safe Modbus data tables, shared as `Arc<DataStore>`
#[derive(Debug)]
pub struct DataStore {
    tables: Mutex<Tables>,
}

fn range_check(len: usize, start: u16, count: usize) -> ModbusResult<std::ops::Range<usize>> {
    let begin = start as usize;
    let end = begin + count;
    if count == 0 || end > len {
        return Err(ModbusError::invalid_address(
            start,
            u16::try_from(count).unwrap_or(u16::MAX),
        ));
    }
    Ok(begin..end)
}

impl DataStore {
    /// 65536 entries per table, all zero
    pub fn new() -> Self {
        Self::with_sizes(
            DEFAULT_TABLE_SIZE,
            DEFAULT_TABLE_SIZE,
            DEFAULT_TABLE_SIZE,
            DEFAULT_TABLE_SIZE,
        )
    }

    pub fn with_sizes(
        coils: usize,
        discrete_inputs: usize,
        holding_registers: usize,
        input_registers: usize,
    ) -> Self {
        Self {
            tables: Mutex::new(Tables {
                coils: vec![false; coils],
                discrete_inputs: vec![false; discrete_inputs],
                holding_registers: vec![0; holding_registers],
                input_registers: vec![0; input_registers],
            }),
        }
    }

    fn lock(&self) -> ModbusResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| ModbusError::internal("Failed to lock data store"))
    }

    pub fn read_coils(&self, start: u16, count: u16) -> ModbusResult<Vec<bool>> {
        let tables = self.lock()?;
        let range = range_check(tables.coils.len(), start, count as usize)?;
        Ok(tables.coils[range].to_vec())
    }

    pub fn write_coils(&self, start: u16, values: &[bool]) -> ModbusResult<()> {
        let mut tables = self.lock()?;
        let range = range_check(tables.coils.len(), start, values.len())?;
        tables.coils[range].copy_from_slice(values);
        Ok(())
    }

    pub fn read_discrete_inputs(&self, start: u16, count: u16) -> ModbusResult<Vec<bool>> {
        let tables = self.lock()?;
        let range = range_check(tables.discrete_inputs.len(), start, count as usize)?;
        Ok(tables.discrete_inputs[range].to_vec())
    }

    pub fn write_discrete_inputs(&self, start: u16, values: &[bool]) -> ModbusResult<()> {
        let mut tables = self.lock()?;
        let range = range_check(tables.discrete_inputs.len(), start, values.len())?;
        tables.discrete_inputs[range].copy_from_slice(values);
        Ok(())
    }

    pub fn read_holding_registers(&self, start: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let tables = self.lock()?;
        let range = range_check(tables.holding_registers.len(), start, count as usize)?;
        Ok(tables.holding_registers[range].to_vec())
    }

    pub fn write_holding_registers(&self, start: u16, values: &[u16]) -> ModbusResult<()> {
        let mut tables = self.lock()?;
        let range = range_check(tables.holding_registers.len(), start, values.len())?;
        tables.holding_registers[range].copy_from_slice(values);
        Ok(())
    }

    pub fn read_input_registers(&self, start: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let tables = self.lock()?;
        let range = range_check(tables.input_registers.len(), start, count as usize)?;
        Ok(tables.input_registers[range].to_vec())
    }

    pub fn write_input_registers(&self, start: u16, values: &[u16]) -> ModbusResult<()> {
        let mut tables = self.lock()?;
        let range = range_check(tables.input_registers.len(), start, values.len())?;
        tables.input_registers[range].copy_from_slice(values);
        Ok(())
    }

    /// Table sizes as (coils, discrete inputs, holding registers, input registers)
    pub fn sizes(&self) -> ModbusResult<(usize, usize, usize, usize)> {
        let tables = self.lock()?;
        Ok((
            tables.coils.len(),
            tables.discrete_inputs.len(),
            tables.holding_registers.len(),
            tables.input_registers.len(),
        ))
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_default_sizes() {
        let store = DataStore::new();
        assert_eq!(store.sizes().unwrap(), (65536, 65536, 65536, 65536));
        // last address is reachable
        store.write_holding_registers(65535, &[7]).unwrap();
        assert_eq!(store.read_holding_registers(65535, 1).unwrap(), vec![7]);
    }

    #[test]
    fn test_read_write_tables() {
        let store = DataStore::with_sizes(16, 16, 16, 16);
        store.write_coils(3, &[true, false, true]).unwrap();
        assert_eq!(store.read_coils(2, 4).unwrap(), vec![false, true, false, true]);

        store.write_discrete_inputs(0, &[true]).unwrap();
        assert_eq!(store.read_discrete_inputs(0, 1).unwrap(), vec![true]);

        store.write_holding_registers(10, &[0x1234, 0x5678]).unwrap();
        assert_eq!(store.read_holding_registers(10, 2).unwrap(), vec![0x1234, 0x5678]);

        store.write_input_registers(15, &[42]).unwrap();
        assert_eq!(store.read_input_registers(15, 1).unwrap(), vec![42]);
    }

    #[test]
    fn test_out_of_range() {
        let store = DataStore::with_sizes(8, 8, 8, 8);
        let err = store.read_holding_registers(6, 3).unwrap_err();
        assert_eq!(err, ModbusError::invalid_address(6, 3));
        assert!(store.write_coils(8, &[true]).is_err());
        assert!(store.read_input_registers(0, 0).is_err());

        // failed writes leave the table untouched
        assert!(store.write_holding_registers(7, &[1, 2]).is_err());
        assert_eq!(store.read_holding_registers(7, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_concurrent_writes_are_atomic() {
        let store = Arc::new(DataStore::with_sizes(0, 0, 4, 0));
        let writers: Vec<_> = (0..8u16)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        store.write_holding_registers(0, &[n; 4]).unwrap();
                        let snapshot = store.read_holding_registers(0, 4).unwrap();
                        assert!(snapshot.iter().all(|&v| v == snapshot[0]));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
    }
}
