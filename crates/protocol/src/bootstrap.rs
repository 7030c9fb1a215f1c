use crate::message::Field;
use tracing::{debug, info};

/// Startup message of a render worker: the compiled module, the worker's
/// id, the shared linear memory, and the address of the boxed entry
/// closure inside that memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Bootstrap<H> {
    pub module: H,
    pub worker_id: u32,
    pub memory: H,
    pub entry_point: u32,
}

impl<H> Bootstrap<H> {
    pub fn encode(self) -> Vec<Field<H>> {
        vec![
            Field::Handle(self.module),
            Field::Number(self.worker_id.into()),
            Field::Handle(self.memory),
            Field::Number(self.entry_point.into()),
        ]
    }

    fn decode(fields: Vec<Field<H>>) -> Option<Self> {
        let [module, worker_id, memory, entry_point]: [Field<H>; 4] = fields.try_into().ok()?;
        Some(Self {
            worker_id: as_u32(&worker_id)?,
            entry_point: as_u32(&entry_point)?,
            module: module.into_handle()?,
            memory: memory.into_handle()?,
        })
    }
}

fn as_u32<H>(field: &Field<H>) -> Option<u32> {
    let n = field.as_number()?;
    (n.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&n)).then_some(n as u32)
}

/// Accepts exactly one well-formed bootstrap message per worker.
#[derive(Debug, Default)]
pub struct BootstrapGuard {
    initialized: bool,
}

impl BootstrapGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns the bootstrap the first time a well-formed one arrives.
    /// Later messages, and malformed ones, yield `None`.
    pub fn accept<H>(&mut self, fields: Vec<Field<H>>) -> Option<Bootstrap<H>> {
        if self.initialized {
            debug!("worker already initialized, bootstrap ignored");
            return None;
        }
        match Bootstrap::decode(fields) {
            Some(bootstrap) => {
                self.initialized = true;
                info!(worker_id = bootstrap.worker_id, "worker bootstrap accepted");
                Some(bootstrap)
            }
            None => {
                debug!("malformed bootstrap ignored");
                None
            }
        }
    }
}
