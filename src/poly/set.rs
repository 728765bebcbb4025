//! Integer sets: iteration domains as named tuples of bounded dimensions.

use std::fmt;

use crate::error::CompileError;

/// Comparison operators usable in extra domain constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    LT,
    LE,
    GT,
    GE,
    EQ,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            CmpOp::LT => "<",
            CmpOp::LE => "<=",
            CmpOp::GT => ">",
            CmpOp::GE => ">=",
            CmpOp::EQ => "=",
        };
        f.write_str(repr)
    }
}

/// An extra affine constraint on one dimension, appended by `SetCond`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    /// `dim % divisor = remainder`
    Mod {
        dim: String,
        divisor: i64,
        remainder: i64,
    },
    /// `dim <op> value`
    Cmp { dim: String, op: CmpOp, value: i64 },
}

impl Cond {
    /// Parse a predicate text such as `"% 2 = 0"`, `"% 2 == 0"` or `"< 50"`
    /// applying to `dim`. Only integer-affine predicates are accepted.
    pub fn parse(dim: &str, text: &str) -> Result<Cond, CompileError> {
        let text = text.trim();
        let fail = || {
            CompileError::domain(format!(
                "cannot parse condition '{text}' on iterator '{dim}': only integer-affine \
                 predicates are supported"
            ))
        };

        if let Some(rest) = text.strip_prefix('%') {
            let (divisor, remainder) = rest
                .split_once("==")
                .or_else(|| rest.split_once('='))
                .ok_or_else(fail)?;
            let divisor: i64 = divisor.trim().parse().map_err(|_| fail())?;
            let remainder: i64 = remainder.trim().parse().map_err(|_| fail())?;
            if divisor <= 0 {
                return Err(fail());
            }
            return Ok(Cond::Mod {
                dim: dim.to_owned(),
                divisor,
                remainder,
            });
        }

        let ops = [
            ("<=", CmpOp::LE),
            (">=", CmpOp::GE),
            ("==", CmpOp::EQ),
            ("<", CmpOp::LT),
            (">", CmpOp::GT),
            ("=", CmpOp::EQ),
        ];
        for (sym, op) in ops {
            if let Some(rest) = text.strip_prefix(sym) {
                let value: i64 = rest.trim().parse().map_err(|_| fail())?;
                return Ok(Cond::Cmp {
                    dim: dim.to_owned(),
                    op,
                    value,
                });
            }
        }
        Err(fail())
    }

    pub fn dim(&self) -> &str {
        match self {
            Cond::Mod { dim, .. } | Cond::Cmp { dim, .. } => dim,
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Mod {
                dim,
                divisor,
                remainder,
            } => write!(f, "{dim} % {divisor} = {remainder}"),
            Cond::Cmp { dim, op, value } => write!(f, "{dim} {op} {value}"),
        }
    }
}

/// An integer set `{ T[d0, …, dk] : lo_0 <= d0 < hi_0 and … }` with one
/// named tuple and closed-open bounds per dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Set {
    tuple: String,
    dims: Vec<String>,
    bounds: Vec<(i64, i64)>,
    conds: Vec<Cond>,
}

impl Set {
    /// Build a set from `(name, lower, upper)` triples; bounds are
    /// closed-open and must be non-empty.
    pub fn new(
        tuple: impl Into<String>,
        iterators: &[(String, i64, i64)],
    ) -> Result<Set, CompileError> {
        let tuple = tuple.into();
        let mut dims = Vec::with_capacity(iterators.len());
        let mut bounds = Vec::with_capacity(iterators.len());
        for (name, lower, upper) in iterators {
            if dims.contains(name) {
                return Err(CompileError::domain(format!(
                    "duplicate iterator '{name}' in domain of '{tuple}'"
                )));
            }
            if lower >= upper {
                return Err(CompileError::domain(format!(
                    "iterator '{name}' of '{tuple}' has empty interval [{lower}, {upper})"
                )));
            }
            dims.push(name.clone());
            bounds.push((*lower, *upper));
        }
        Ok(Set {
            tuple,
            dims,
            bounds,
            conds: Vec::new(),
        })
    }

    pub fn tuple(&self) -> &str {
        &self.tuple
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn n_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn bounds(&self) -> &[(i64, i64)] {
        &self.bounds
    }

    /// Bounds of the dimension called `name`.
    pub fn dim_bounds(&self, name: &str) -> Option<(i64, i64)> {
        self.dim_index(name).map(|i| self.bounds[i])
    }

    pub fn dim_index(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == name)
    }

    pub fn conds(&self) -> &[Cond] {
        &self.conds
    }

    /// Append an extra constraint; its dimension must belong to the set.
    pub fn add_cond(&mut self, cond: Cond) -> Result<(), CompileError> {
        if self.dim_index(cond.dim()).is_none() {
            return Err(CompileError::domain(format!(
                "condition on unknown iterator '{}' of '{}'",
                cond.dim(),
                self.tuple
            )));
        }
        self.conds.push(cond);
        Ok(())
    }

    /// Whether `other` covers the same dimensions with the same bounds
    /// (tuple names may differ). Fused stages must agree on this.
    pub fn same_shape(&self, other: &Set) -> bool {
        self.dims == other.dims && self.bounds == other.bounds
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ {}[{}] : ", self.tuple, self.dims.join(", "))?;
        let mut constraints: Vec<String> = self
            .dims
            .iter()
            .zip(&self.bounds)
            .map(|(d, (lo, hi))| format!("{lo} <= {d} < {hi}"))
            .collect();
        constraints.extend(self.conds.iter().map(Cond::to_string));
        write!(f, "{} }}", constraints.join(" and "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dom() -> Set {
        Set::new(
            "S0",
            &[
                ("i".to_owned(), 0, 100),
                ("j".to_owned(), 0, 200),
            ],
        )
        .unwrap()
    }

    #[test]
    fn display_classical_notation() {
        assert_eq!(
            dom().to_string(),
            "{ S0[i, j] : 0 <= i < 100 and 0 <= j < 200 }"
        );
    }

    #[test]
    fn duplicate_dims_rejected() {
        let err = Set::new(
            "S0",
            &[("i".to_owned(), 0, 4), ("i".to_owned(), 0, 4)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn cond_parsing() {
        assert_eq!(
            Cond::parse("i", "% 2 = 0").unwrap(),
            Cond::Mod {
                dim: "i".to_owned(),
                divisor: 2,
                remainder: 0
            }
        );
        assert_eq!(
            Cond::parse("j", "< 50").unwrap(),
            Cond::Cmp {
                dim: "j".to_owned(),
                op: CmpOp::LT,
                value: 50
            }
        );
        assert!(Cond::parse("i", "is even").is_err());
    }

    #[test]
    fn conds_attach_to_known_dims() {
        let mut d = dom();
        assert!(d.add_cond(Cond::parse("i", "% 2 = 0").unwrap()).is_ok());
        assert!(d.add_cond(Cond::parse("q", "< 3").unwrap()).is_err());
        assert!(d.to_string().contains("i % 2 = 0"));
    }
}
