#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionModel, ModelShape};
use crate::detect::result::RawPredictions;
use crate::error::DetectError;
use crate::geometry::ImageSize;
use crate::preprocess::ImageTensor;

type Plan = TypedRunnableModel<TypedModel>;

/// Output index of `pred_logits` in the exported graph.
const LOGITS_OUTPUT: usize = 0;
/// Output index of `pred_boxes` in the exported graph.
const BOXES_OUTPUT: usize = 1;

/// Tract-based backend for an ONNX export of the detection transformer.
///
/// The checkpoint is parsed once. Optimized plans are specialized for a
/// concrete input size; a frame producing a different size gets a fresh
/// plan built from the same parsed graph.
pub struct TractModel {
    graph: InferenceModel,
    shape: ModelShape,
    plan: Mutex<Option<(ImageSize, Arc<Plan>)>>,
}

impl TractModel {
    /// Load an ONNX checkpoint and verify its output shape for `input_hint`.
    pub fn load<P: AsRef<Path>>(
        checkpoint: P,
        shape: ModelShape,
        input_hint: ImageSize,
    ) -> crate::error::Result<Self> {
        let checkpoint = checkpoint.as_ref();
        let graph = tract_onnx::onnx()
            .model_for_path(checkpoint)
            .with_context(|| format!("failed to load ONNX model from {}", checkpoint.display()))
            .map_err(DetectError::Model)?;

        let plan = build_plan(&graph, input_hint).map_err(DetectError::Model)?;
        check_output_facts(&plan, shape)?;
        log::info!(
            "TractModel: loaded {} ({}, input {})",
            checkpoint.display(),
            shape,
            input_hint
        );

        Ok(Self {
            graph,
            shape,
            plan: Mutex::new(Some((input_hint, Arc::new(plan)))),
        })
    }

    fn plan_for(&self, size: ImageSize) -> Result<Arc<Plan>> {
        let mut guard = self
            .plan
            .lock()
            .map_err(|_| anyhow!("tract plan lock poisoned"))?;
        if let Some((cached, plan)) = guard.as_ref() {
            if *cached == size {
                return Ok(Arc::clone(plan));
            }
        }
        log::info!("TractModel: specializing plan for input {}", size);
        let plan = Arc::new(build_plan(&self.graph, size)?);
        check_output_facts(&plan, self.shape)?;
        *guard = Some((size, Arc::clone(&plan)));
        Ok(plan)
    }
}

fn build_plan(graph: &InferenceModel, size: ImageSize) -> Result<Plan> {
    graph
        .clone()
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, size.height as usize, size.width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn check_output_facts(plan: &Plan, shape: ModelShape) -> crate::error::Result<()> {
    let model = plan.model();
    if model.outputs.len() < 2 {
        return Err(DetectError::ConfigMismatch(format!(
            "checkpoint exposes {} outputs, expected pred_logits and pred_boxes",
            model.outputs.len()
        )));
    }
    let expected = [(LOGITS_OUTPUT, shape.num_classes), (BOXES_OUTPUT, 4)];
    for (output, last_dim) in expected {
        let fact = model
            .output_fact(output)
            .map_err(DetectError::Model)?;
        let dims = fact.shape.as_concrete().map(|d| d.to_vec());
        if let Some(dims) = dims {
            if dims != [1, shape.num_queries, last_dim] {
                return Err(DetectError::ConfigMismatch(format!(
                    "output {} has shape {:?}, configuration expects [1, {}, {}]",
                    output, dims, shape.num_queries, last_dim
                )));
            }
        }
    }
    Ok(())
}

fn output_values(outputs: &TVec<TValue>, index: usize) -> Result<(Vec<usize>, Vec<f32>)> {
    let output = outputs
        .get(index)
        .ok_or_else(|| anyhow!("model produced no output {}", index))?;
    let view = output
        .to_array_view::<f32>()
        .with_context(|| format!("model output {} was not f32", index))?;
    Ok((view.shape().to_vec(), view.iter().copied().collect()))
}

impl DetectionModel for TractModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn shape(&self) -> ModelShape {
        self.shape
    }

    fn infer(&self, input: &ImageTensor) -> Result<RawPredictions> {
        let plan = self.plan_for(input.size())?;
        let tensor = tract_ndarray::Array4::from_shape_vec(input.shape(), input.data().to_vec())
            .context("input tensor shape")?
            .into_tensor();
        let outputs = plan
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;

        let (logit_dims, logits) = output_values(&outputs, LOGITS_OUTPUT)?;
        let (box_dims, boxes) = output_values(&outputs, BOXES_OUTPUT)?;
        let &[_, num_queries, num_classes] = logit_dims.as_slice() else {
            return Err(DetectError::MalformedOutput(format!(
                "pred_logits has rank {}, expected 3",
                logit_dims.len()
            ))
            .into());
        };
        if box_dims.last() != Some(&4) {
            return Err(
                DetectError::MalformedOutput(format!("pred_boxes has shape {:?}", box_dims)).into(),
            );
        }

        Ok(RawPredictions::new(
            ModelShape {
                num_queries,
                num_classes,
            },
            logits,
            boxes,
        )?)
    }
}
