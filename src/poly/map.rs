//! Affine relations: schedules and access maps.

use std::fmt;

use crate::error::CompileError;

use super::set::Set;

/// An affine expression over the domain dimensions of a [`Map`]:
/// `sum(coeffs[i] * d_i) + constant`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffExpr {
    coeffs: Vec<i64>,
    constant: i64,
}

impl AffExpr {
    /// The constant expression over `n` dimensions.
    pub fn constant(n: usize, value: i64) -> Self {
        AffExpr {
            coeffs: vec![0; n],
            constant: value,
        }
    }

    /// The single dimension `index` over `n` dimensions.
    pub fn dim(n: usize, index: usize) -> Self {
        let mut coeffs = vec![0; n];
        coeffs[index] = 1;
        AffExpr {
            coeffs,
            constant: 0,
        }
    }

    pub fn from_parts(coeffs: Vec<i64>, constant: i64) -> Self {
        AffExpr { coeffs, constant }
    }

    pub fn coeffs(&self) -> &[i64] {
        &self.coeffs
    }

    pub fn constant_part(&self) -> i64 {
        self.constant
    }

    /// When the expression is exactly one dimension, its index.
    pub fn as_dim(&self) -> Option<usize> {
        if self.constant != 0 {
            return None;
        }
        let mut found = None;
        for (i, &c) in self.coeffs.iter().enumerate() {
            match c {
                0 => {}
                1 if found.is_none() => found = Some(i),
                _ => return None,
            }
        }
        found
    }

    fn display(&self, dims: &[String]) -> String {
        let mut parts = Vec::new();
        for (i, &c) in self.coeffs.iter().enumerate() {
            match c {
                0 => {}
                1 => parts.push(dims[i].clone()),
                _ => parts.push(format!("{c}{}", dims[i])),
            }
        }
        if self.constant != 0 || parts.is_empty() {
            parts.push(self.constant.to_string());
        }
        parts.join(" + ")
    }
}

/// An affine relation from a named tuple to a range of affine expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    tuple: String,
    in_dims: Vec<String>,
    out_names: Vec<Option<String>>,
    outs: Vec<AffExpr>,
}

impl Map {
    /// The identity relation over a domain.
    pub fn identity(domain: &Set) -> Map {
        let n = domain.n_dims();
        Map {
            tuple: domain.tuple().to_owned(),
            in_dims: domain.dims().to_vec(),
            out_names: domain.dims().iter().cloned().map(Some).collect(),
            outs: (0..n).map(|i| AffExpr::dim(n, i)).collect(),
        }
    }

    /// The classical `2k+1` schedule: zero "beta" constants at even output
    /// positions interleaved with the domain dimensions at odd positions.
    pub fn identity_with_betas(domain: &Set) -> Map {
        let n = domain.n_dims();
        let mut out_names = Vec::with_capacity(2 * n + 1);
        let mut outs = Vec::with_capacity(2 * n + 1);
        for i in 0..n {
            out_names.push(None);
            outs.push(AffExpr::constant(n, 0));
            out_names.push(Some(domain.dims()[i].clone()));
            outs.push(AffExpr::dim(n, i));
        }
        out_names.push(None);
        outs.push(AffExpr::constant(n, 0));
        Map {
            tuple: domain.tuple().to_owned(),
            in_dims: domain.dims().to_vec(),
            out_names,
            outs,
        }
    }

    pub fn tuple(&self) -> &str {
        &self.tuple
    }

    pub fn in_dims(&self) -> &[String] {
        &self.in_dims
    }

    pub fn range_dims(&self) -> usize {
        self.outs.len()
    }

    pub fn range_dim_name(&self, i: usize) -> Option<&str> {
        self.out_names.get(i).and_then(|n| n.as_deref())
    }

    pub fn outs(&self) -> &[AffExpr] {
        &self.outs
    }

    /// Position of the named range dimension.
    pub fn find_range_dim(&self, name: &str) -> Option<usize> {
        self.out_names
            .iter()
            .position(|n| n.as_deref() == Some(name))
    }

    /// Overwrite the constant at an (unnamed) output position; used to
    /// assign beta values that linearize stages.
    pub fn set_out_constant(&mut self, pos: usize, value: i64) -> Result<(), CompileError> {
        let n = self.in_dims.len();
        let out = self.outs.get_mut(pos).ok_or_else(|| {
            CompileError::schedule(format!("schedule of '{}' has no output {pos}", self.tuple))
        })?;
        *out = AffExpr::constant(n, value);
        Ok(())
    }

    /// Swap two named range dimensions (loop interchange).
    pub fn swap_range_dims(&mut self, a: &str, b: &str) -> Result<(), CompileError> {
        let pa = self
            .find_range_dim(a)
            .ok_or_else(|| CompileError::schedule(format!(
                "interchange of unknown dimension '{a}' in schedule of '{}'",
                self.tuple
            )))?;
        let pb = self
            .find_range_dim(b)
            .ok_or_else(|| CompileError::schedule(format!(
                "interchange of unknown dimension '{b}' in schedule of '{}'",
                self.tuple
            )))?;
        self.outs.swap(pa, pb);
        self.out_names.swap(pa, pb);
        Ok(())
    }

    /// Compose `transform` onto the range of this relation. The transform's
    /// domain arity must match this relation's range arity.
    pub fn apply_range(&self, transform: &Map) -> Result<Map, CompileError> {
        if transform.in_dims.len() != self.outs.len() {
            return Err(CompileError::schedule(format!(
                "range of '{}' has {} dimensions but the transform expects {}",
                self.tuple,
                self.outs.len(),
                transform.in_dims.len()
            )));
        }
        let n = self.in_dims.len();
        let mut outs = Vec::with_capacity(transform.outs.len());
        for t in &transform.outs {
            let mut coeffs = vec![0i64; n];
            let mut constant = t.constant_part();
            for (j, &c) in t.coeffs().iter().enumerate() {
                if c == 0 {
                    continue;
                }
                let inner = &self.outs[j];
                for (k, &ic) in inner.coeffs().iter().enumerate() {
                    coeffs[k] += c * ic;
                }
                constant += c * inner.constant_part();
            }
            outs.push(AffExpr::from_parts(coeffs, constant));
        }
        Ok(Map {
            tuple: self.tuple.clone(),
            in_dims: self.in_dims.clone(),
            out_names: transform.out_names.clone(),
            outs,
        })
    }
}

impl fmt::Display for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outs: Vec<String> = self.outs.iter().map(|o| o.display(&self.in_dims)).collect();
        write!(
            f,
            "{{ {}[{}] -> [{}] }}",
            self.tuple,
            self.in_dims.join(", "),
            outs.join(", ")
        )
    }
}

/// An access relation from a stage's domain to a tensor's coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessMap {
    stage: String,
    dims: Vec<String>,
    tensor: String,
    indices: Vec<AffExpr>,
}

impl AccessMap {
    pub fn new(
        stage: impl Into<String>,
        dims: Vec<String>,
        tensor: impl Into<String>,
        indices: Vec<AffExpr>,
    ) -> Self {
        AccessMap {
            stage: stage.into(),
            dims,
            tensor: tensor.into(),
            indices,
        }
    }

    /// The domain tuple name; always the owning stage's name.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn tensor(&self) -> &str {
        &self.tensor
    }

    pub fn indices(&self) -> &[AffExpr] {
        &self.indices
    }
}

impl fmt::Display for AccessMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let idx: Vec<String> = self.indices.iter().map(|e| e.display(&self.dims)).collect();
        write!(
            f,
            "{{ {}[{}] -> {}[{}] }}",
            self.stage,
            self.dims.join(", "),
            self.tensor,
            idx.join(", ")
        )
    }
}
