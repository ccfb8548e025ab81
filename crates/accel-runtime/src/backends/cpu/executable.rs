//! Compilation and execution on the host runtime

use sha2::{Digest, Sha256};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::buffer::{BufferState, CpuBuffer, ReadyEvent, Storage};
use super::interpreter;
use super::RuntimeShared;
use crate::backend::{CompileOptions, Device, DeviceBuffer, ExecuteOptions, LoadedExecutable};
use crate::computation::Computation;
use crate::error::{Result, RuntimeError};
use crate::literal::Literal;
use crate::shape::Shape;

/// A computation compiled for the host runtime
pub struct CpuExecutable {
    runtime: Arc<RuntimeShared>,
    computation: Arc<Computation>,
    parameter_shapes: Vec<Shape>,
    num_replicas: usize,
    num_partitions: usize,
    fingerprint: String,
}

impl CpuExecutable {
    /// Validate `computation` against `options` and load it
    pub(crate) fn compile(
        runtime: Arc<RuntimeShared>,
        computation: &Computation,
        options: &CompileOptions,
    ) -> Result<Self> {
        let build = &options.executable_build_options;
        if options.parameter_is_tupled_arguments {
            return Err(RuntimeError::Unimplemented(
                "tupled arguments are not supported by the host runtime".into(),
            ));
        }
        if build.num_replicas == 0 || build.num_partitions == 0 {
            return Err(RuntimeError::invalid_argument(
                "replica and partition counts must be at least 1",
            ));
        }
        if build.num_partitions > 1 {
            return Err(RuntimeError::Unimplemented(
                "the host runtime does not support partitioned programs".into(),
            ));
        }
        if !options.compile_portable_executable && build.num_replicas > runtime.devices.len() {
            return Err(RuntimeError::Compilation(format!(
                "program needs {} replicas but only {} devices are available",
                build.num_replicas,
                runtime.devices.len()
            )));
        }
        if let Some(ordinal) = build.device_ordinal {
            runtime.device(ordinal)?;
        }

        let parameters = computation.parameter_shapes();
        if let Some(layouts) = &options.argument_layouts {
            if layouts.len() != parameters.len() {
                return Err(RuntimeError::Compilation(format!(
                    "{} argument layouts given for {} parameters",
                    layouts.len(),
                    parameters.len()
                )));
            }
            for (index, (layout, parameter)) in layouts.iter().zip(parameters).enumerate() {
                if !layout.compatible(parameter) {
                    return Err(RuntimeError::Compilation(format!(
                        "argument {index} layout {layout} does not match parameter {parameter}"
                    )));
                }
                let row_major = layout
                    .leaves()
                    .iter()
                    .all(|leaf| leaf.layout.as_ref().map_or(true, |l| l.is_descending()));
                if !row_major {
                    return Err(RuntimeError::Compilation(format!(
                        "argument {index} requests layout {layout}; only row-major layouts are supported"
                    )));
                }
            }
        }

        let fingerprint = fingerprint(computation, options)?;
        tracing::debug!(
            name = computation.name(),
            replicas = build.num_replicas,
            fingerprint = %fingerprint,
            "compiled host executable"
        );

        Ok(Self {
            runtime,
            computation: Arc::new(computation.clone()),
            parameter_shapes: parameters.iter().map(Shape::with_default_layout).collect(),
            num_replicas: build.num_replicas,
            num_partitions: build.num_partitions,
            fingerprint,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn parameter_shapes(&self) -> &[Shape] {
        &self.parameter_shapes
    }

    fn result_shapes(&self, untuple: bool) -> Vec<Shape> {
        let root = self.computation.root_shape().with_default_layout();
        match root {
            Shape::Tuple(elements) if untuple => elements,
            other => vec![other],
        }
    }
}

/// SHA-256 over the serialized computation and compile options
fn fingerprint(computation: &Computation, options: &CompileOptions) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(bincode::serialize(computation)?);
    hasher.update(bincode::serialize(options)?);
    Ok(hex::encode(hasher.finalize()))
}

impl fmt::Debug for CpuExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuExecutable")
            .field("name", &self.computation.name())
            .field("num_replicas", &self.num_replicas)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl LoadedExecutable for CpuExecutable {
    fn name(&self) -> &str {
        self.computation.name()
    }

    fn num_replicas(&self) -> usize {
        self.num_replicas
    }

    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn execute_portable(
        &self,
        arguments: &[&dyn DeviceBuffer],
        device: &dyn Device,
        options: &ExecuteOptions,
    ) -> Result<Vec<Box<dyn DeviceBuffer>>> {
        let device = self.runtime.resolve(device)?;
        if arguments.len() != self.parameter_shapes.len() {
            return Err(RuntimeError::invalid_argument(format!(
                "{} expects {} arguments, got {}",
                self.name(),
                self.parameter_shapes.len(),
                arguments.len()
            )));
        }

        let mut inputs = Vec::with_capacity(arguments.len());
        for (index, (argument, parameter)) in arguments.iter().zip(&self.parameter_shapes).enumerate() {
            let buffer = argument.as_any().downcast_ref::<CpuBuffer>().ok_or_else(|| {
                RuntimeError::invalid_argument(format!("argument {index} is not a host runtime buffer"))
            })?;
            if buffer.device().runtime_id() != self.runtime.id {
                return Err(RuntimeError::invalid_argument(format!(
                    "argument {index} belongs to another runtime"
                )));
            }
            let reader = buffer.state().begin_read().map_err(|_| {
                RuntimeError::failed_precondition(format!("argument {index} has been deleted or donated"))
            })?;
            if buffer.device().id() != device.id() {
                return Err(RuntimeError::invalid_argument(format!(
                    "argument {index} is on device {} but the program runs on {}",
                    buffer.device().id(),
                    device.id()
                )));
            }
            let shape = buffer.on_device_shape();
            let matches = if options.strict_shape_checking {
                shape.with_default_layout() == *parameter
            } else {
                shape.compatible(parameter)
            };
            if !matches {
                return Err(RuntimeError::shape_mismatch(parameter, shape));
            }
            inputs.push((reader, shape.clone()));
        }

        let result_shapes = self.result_shapes(options.untuple_result);
        let outputs: Vec<Arc<BufferState>> = result_shapes.iter().map(|_| BufferState::pending()).collect();

        let computation = self.computation.clone();
        let worker_device = device.clone();
        let untuple = options.untuple_result;
        let pending = outputs.clone();
        let status = Arc::new(ReadyEvent::default());
        let finished = status.clone();
        let job = move || {
            let started = Instant::now();
            // Each claim is dropped as soon as its argument is read
            let outcome = inputs
                .into_iter()
                .map(|(reader, shape)| reader.read(&shape))
                .collect::<Result<Vec<Literal>>>()
                .and_then(|arguments| interpreter::evaluate(&computation, arguments, &worker_device))
                .and_then(|result| {
                    if untuple && result.shape().is_tuple() {
                        result.decompose_tuple()
                    } else {
                        Ok(vec![result])
                    }
                });
            tracing::debug!(
                name = computation.name(),
                device = %worker_device.id(),
                duration_us = started.elapsed().as_micros() as u64,
                ok = outcome.is_ok(),
                "host execution finished"
            );
            match outcome {
                Ok(results) => {
                    for (state, literal) in pending.iter().zip(results) {
                        state.complete(Ok(Storage::Owned(literal)));
                    }
                    finished.set(Ok(()));
                }
                Err(err) => {
                    for state in &pending {
                        state.complete(Err(err.clone()));
                    }
                    finished.set(Err(err));
                }
            }
        };

        let asynchronous = device.is_asynchronous();
        device.enqueue(job);

        // Without a stream the job already ran, so surface its failure here
        if !asynchronous {
            status.wait()?;
        }

        Ok(outputs
            .into_iter()
            .zip(result_shapes)
            .map(|(state, shape)| {
                Box::new(CpuBuffer::new(self.runtime.clone(), device.clone(), shape, state)) as Box<dyn DeviceBuffer>
            })
            .collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
