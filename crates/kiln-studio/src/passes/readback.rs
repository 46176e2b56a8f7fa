use kiln_engine::Result;
use kiln_engine::command::CommandBuffer;
use kiln_engine::frame::FrameContext;
use kiln_engine::pass::{BarrierBuilder, Pass, PassBarriers, StateToken};
use kiln_engine::resource::{ResourceHandle, ResourceState};

pub struct InputStates {
    pub values: StateToken,
    pub readback: StateToken,
}

pub struct OutputStates {
    pub values: StateToken,
    pub readback: StateToken,
}

/// Copies a buffer into a mappable one.
pub struct ReadbackPass {
    values: ResourceHandle,
    readback: ResourceHandle,
    barriers: PassBarriers,
}

impl ReadbackPass {
    pub fn new(
        values: &ResourceHandle,
        readback: &ResourceHandle,
        inputs: InputStates,
    ) -> Result<(Self, OutputStates)> {
        let mut barriers = BarrierBuilder::new("readback");
        let values_token = barriers.require(values, inputs.values, ResourceState::CopySource)?;
        let readback_token =
            barriers.require(readback, inputs.readback, ResourceState::CopyDest)?;

        let pass = Self {
            values: values.clone(),
            readback: readback.clone(),
            barriers: barriers.finish(),
        };
        let outputs = OutputStates {
            values: values_token,
            readback: readback_token,
        };
        Ok((pass, outputs))
    }
}

impl Pass for ReadbackPass {
    fn label(&self) -> &str {
        "readback"
    }

    fn barriers(&self) -> &PassBarriers {
        &self.barriers
    }

    fn record(&self, cmd: &mut CommandBuffer, _frame: &FrameContext<'_>) -> Result<()> {
        cmd.copy_buffer(&self.values, 0, &self.readback, 0, self.values.size_bytes())
    }
}
