//! In-memory gate channel replaying a fixed list of requests

use std::collections::VecDeque;

use super::{BioCmd, BlockRequest, FetchError, GateChannel, UnitInfo, UnitSpec};
use crate::error::{Error, Result};

/// Something the scripted kernel delivers on the next fetch
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Read { offset: u64, length: usize },
    Write { offset: u64, data: Vec<u8> },
    Delete { offset: u64, length: usize },
    Other { cmd: u32, offset: u64, length: usize },
    Fail(FetchError),
}

/// A completion reported back by the engine
#[derive(Debug, Clone)]
pub(crate) struct Completion {
    pub request: BlockRequest,
    pub error: i32,
    /// Data returned for successful reads
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedGate {
    pub script: VecDeque<Scripted>,
    pub completions: Vec<Completion>,
    /// Buffer capacity advertised on every fetch, in order
    pub capacities: Vec<usize>,
    pub created: Vec<UnitSpec>,
    pub cancelled: Vec<i32>,
    pub destroyed: Vec<(i32, bool)>,
    pub units: Vec<UnitInfo>,
    next_seq: usize,
    next_unit: i32,
}

impl ScriptedGate {
    pub fn new(script: Vec<Scripted>) -> Self {
        ScriptedGate {
            script: script.into(),
            ..Default::default()
        }
    }

    fn request(&mut self, cmd: BioCmd, offset: u64, length: usize) -> BlockRequest {
        self.next_seq += 1;
        BlockRequest {
            cmd,
            offset,
            length,
            seq: self.next_seq,
        }
    }
}

impl GateChannel for ScriptedGate {
    fn create(&mut self, spec: &UnitSpec) -> Result<i32> {
        let unit = if spec.unit == super::UNIT_AUTO {
            self.next_unit
        } else {
            spec.unit
        };
        self.next_unit = unit + 1;
        self.created.push(spec.clone());
        self.units.push(UnitInfo {
            unit,
            name: format!("{}{}", super::PROVIDER_NAME, unit),
            media_size: spec.media_size,
            sector_size: spec.sector_size,
        });
        Ok(unit)
    }

    fn cancel(&mut self, unit: i32) -> Result<()> {
        if !self.units.iter().any(|u| u.unit == unit) {
            return Err(Error::Gate(libc::ENXIO));
        }
        self.cancelled.push(unit);
        Ok(())
    }

    fn destroy(&mut self, unit: i32, force: bool) -> Result<()> {
        let before = self.units.len();
        self.units.retain(|u| u.unit != unit);
        if self.units.len() == before {
            return Err(Error::Gate(libc::ENXIO));
        }
        self.destroyed.push((unit, force));
        Ok(())
    }

    fn list(&mut self, unit: Option<i32>) -> Result<Vec<UnitInfo>> {
        Ok(self
            .units
            .iter()
            .filter(|u| unit.map_or(true, |n| n == u.unit))
            .cloned()
            .collect())
    }

    fn next_request(
        &mut self,
        _unit: i32,
        buf: &mut [u8],
    ) -> std::result::Result<BlockRequest, FetchError> {
        self.capacities.push(buf.len());
        let Some(next) = self.script.pop_front() else {
            return Err(FetchError::Cancelled);
        };

        match next {
            Scripted::Read { offset, length } => Ok(self.request(BioCmd::Read, offset, length)),
            Scripted::Write { offset, data } => {
                if data.len() > buf.len() {
                    let required = data.len();
                    self.script.push_front(Scripted::Write { offset, data });
                    return Err(FetchError::Retryable(required));
                }
                buf[..data.len()].copy_from_slice(&data);
                Ok(self.request(BioCmd::Write, offset, data.len()))
            }
            Scripted::Delete { offset, length } => {
                Ok(self.request(BioCmd::Delete, offset, length))
            }
            Scripted::Other { cmd, offset, length } => {
                Ok(self.request(BioCmd::Other(cmd), offset, length))
            }
            Scripted::Fail(err) => Err(err),
        }
    }

    fn complete(
        &mut self,
        _unit: i32,
        request: &BlockRequest,
        buf: &mut [u8],
        error: i32,
    ) -> Result<()> {
        let data = (request.cmd == BioCmd::Read && error == 0)
            .then(|| buf[..request.length].to_vec());
        self.completions.push(Completion {
            request: request.clone(),
            error,
            data,
        });
        Ok(())
    }
}
