use std::fmt;
use std::str::FromStr;

use itertools::Itertools;

use ta_error::*;
use ta_tensor::Permutation;

/// The labels of the axes of an array expression, e.g. `"i,j,k"`.
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct VarList {
    vars: Vec<String>,
}

impl VarList {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(vars: I) -> TAResult<Self> {
        let vars: Vec<String> = vars.into_iter().map(Into::into).collect();

        if let Some(var) = vars.iter().find(|var| !is_valid(var)) {
            return Err(bad_request!("invalid axis label: {:?}", var));
        }

        if !vars.iter().all_unique() {
            return Err(bad_request!("duplicate axis label in {:?}", vars));
        }

        Ok(Self { vars })
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(String::as_str)
    }

    pub fn position(&self, var: &str) -> Option<usize> {
        self.vars.iter().position(|v| v == var)
    }

    pub fn contains(&self, var: &str) -> bool {
        self.position(var).is_some()
    }

    /// Return `true` if `other` has exactly the same labels as this list, in any order.
    pub fn is_permutation_of(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|var| other.contains(var))
    }

    /// The permutation which reorders axes labeled by this list into the order of `target`.
    pub fn permutation_to(&self, target: &Self) -> TAResult<Permutation> {
        if !self.is_permutation_of(target) {
            return Err(bad_request!("{} is not a permutation of {}", target, self));
        }

        let map = self
            .iter()
            .map(|var| target.position(var))
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| bad_request!("{} is not a permutation of {}", target, self))?;

        Permutation::new(map)
    }

    /// The labels of this list which also appear in `other`, in the order of this list.
    pub fn common(&self, other: &Self) -> Self {
        let vars = self.iter().filter(|var| other.contains(var)).map(String::from).collect();
        Self { vars }
    }

    /// The labels of this list which do not appear in `other`, in the order of this list.
    pub fn outer(&self, other: &Self) -> Self {
        let vars = self.iter().filter(|var| !other.contains(var)).map(String::from).collect();
        Self { vars }
    }

    /// Concatenate this list with `other`.
    pub fn concat(&self, other: &Self) -> TAResult<Self> {
        Self::new(self.vars.iter().chain(&other.vars).cloned())
    }
}

impl FromStr for VarList {
    type Err = TAError;

    fn from_str(vars: &str) -> TAResult<Self> {
        if vars.trim().is_empty() {
            return Err(bad_request!("an expression must label at least one axis"));
        }

        Self::new(vars.split(',').map(str::trim))
    }
}

impl fmt::Debug for VarList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self)
    }
}

impl fmt::Display for VarList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.vars.join(","))
    }
}

fn is_valid(var: &str) -> bool {
    let mut chars = var.chars();

    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let vars: VarList = " i, j ,k2".parse().unwrap();
        assert_eq!(vars.len(), 3);
        assert_eq!(vars.to_string(), "i,j,k2");
        assert_eq!(format!("{:?}", vars), "[i,j,k2]");

        assert!("i,i".parse::<VarList>().is_err());
        assert!("i,,j".parse::<VarList>().is_err());
        assert!("".parse::<VarList>().is_err());
        assert!("1i".parse::<VarList>().is_err());
    }

    #[test]
    fn test_permutation_to() {
        let from: VarList = "i,j,k".parse().unwrap();
        let to: VarList = "k,i,j".parse().unwrap();
        let perm = from.permutation_to(&to).unwrap();

        let labels: Vec<&str> = from.iter().collect();
        let permuted = perm.apply(&labels).unwrap();
        assert_eq!(permuted, to.iter().collect::<Vec<_>>());

        let other: VarList = "i,j,l".parse().unwrap();
        assert!(!from.is_permutation_of(&other));
        assert!(from.permutation_to(&other).is_err());
    }

    #[test]
    fn test_contraction_labels() {
        let left: VarList = "i,k,l".parse().unwrap();
        let right: VarList = "l,j,k".parse().unwrap();

        assert_eq!(left.common(&right).to_string(), "k,l");
        assert_eq!(left.outer(&right).to_string(), "i");
        assert_eq!(right.outer(&left).to_string(), "j");
        assert_eq!(left.outer(&right).concat(&right.outer(&left)).unwrap().to_string(), "i,j");
        assert!(left.concat(&right).is_err());
    }
}
