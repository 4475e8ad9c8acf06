use crate::{DType, Tensor};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorName(pub String);

impl TensorName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for TensorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: TensorName,
    pub dtype: DType,
    pub dims: Vec<Option<usize>>, // None = dynamic
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

impl ModelSpec {
    /// Checks one request's named inputs against this spec: every declared
    /// input present exactly once, dtype and rank matching, fixed dims
    /// matching, payload length consistent with dtype and shape.
    pub fn validate_inputs(&self, inputs: &[(TensorName, Tensor)]) -> Result<(), String> {
        if inputs.len() != self.inputs.len() {
            return Err(format!(
                "expected {} inputs, got {}",
                self.inputs.len(),
                inputs.len()
            ));
        }

        for spec in &self.inputs {
            let (_, tensor) = inputs
                .iter()
                .find(|(name, _)| *name == spec.name)
                .ok_or_else(|| format!("missing input '{}'", spec.name))?;

            if tensor.desc.dtype != spec.dtype {
                return Err(format!(
                    "input '{}' has dtype {:?}, expected {:?}",
                    spec.name, tensor.desc.dtype, spec.dtype
                ));
            }
            if tensor.desc.shape.rank() != spec.dims.len() {
                return Err(format!(
                    "input '{}' has rank {}, expected {}",
                    spec.name,
                    tensor.desc.shape.rank(),
                    spec.dims.len()
                ));
            }
            for (axis, (have, want)) in tensor.desc.shape.0.iter().zip(&spec.dims).enumerate() {
                if let Some(want) = want {
                    if have != want {
                        return Err(format!(
                            "input '{}' dim {} is {}, expected {}",
                            spec.name, axis, have, want
                        ));
                    }
                }
            }
            if tensor.byte_len() != tensor.expected_byte_len() {
                return Err(format!(
                    "input '{}' byte size mismatch: got {}, expected {}",
                    spec.name,
                    tensor.byte_len(),
                    tensor.expected_byte_len()
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;
    use bytes::Bytes;

    fn spec() -> ModelSpec {
        ModelSpec {
            inputs: vec![TensorSpec {
                name: TensorName::new("x"),
                dtype: DType::F32,
                dims: vec![None, Some(4)],
            }],
            outputs: vec![TensorSpec {
                name: TensorName::new("y"),
                dtype: DType::F32,
                dims: vec![None, Some(4)],
            }],
        }
    }

    fn f32_input(rows: usize, cols: usize) -> (TensorName, Tensor) {
        let data = vec![0u8; rows * cols * 4];
        (
            TensorName::new("x"),
            Tensor::from_bytes(DType::F32, Shape::from_slice(&[rows, cols]), Bytes::from(data)),
        )
    }

    #[test]
    fn accepts_matching_input() {
        assert!(spec().validate_inputs(&[f32_input(2, 4)]).is_ok());
    }

    #[test]
    fn dynamic_dim_accepts_any_extent() {
        assert!(spec().validate_inputs(&[f32_input(1, 4)]).is_ok());
        assert!(spec().validate_inputs(&[f32_input(7, 4)]).is_ok());
    }

    #[test]
    fn rejects_fixed_dim_mismatch() {
        let err = spec().validate_inputs(&[f32_input(2, 5)]).unwrap_err();
        assert!(err.contains("dim 1"), "{err}");
    }

    #[test]
    fn rejects_missing_and_misnamed_inputs() {
        assert!(spec().validate_inputs(&[]).is_err());

        let (_, tensor) = f32_input(2, 4);
        let err = spec()
            .validate_inputs(&[(TensorName::new("z"), tensor)])
            .unwrap_err();
        assert!(err.contains("missing input 'x'"), "{err}");
    }

    #[test]
    fn rejects_short_payload() {
        let (name, mut tensor) = f32_input(2, 4);
        tensor.data = tensor.data.slice(..8);
        let err = spec().validate_inputs(&[(name, tensor)]).unwrap_err();
        assert!(err.contains("byte size mismatch"), "{err}");
    }
}
