/// Where in the lowering a failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Site {
    /// Nesting depth; 0 is the top-level graph.
    pub depth: usize,
    /// Instance names of the enclosing nested functions, outermost first.
    pub path: Vec<String>,
    /// Index of the equation inside its graph level.
    pub equation: Option<usize>,
    /// Primitive identifier of that equation.
    pub primitive: Option<String>,
}

impl Site {
    /// Creates a new `Site` for a graph level.
    pub fn new(depth: usize, path: Vec<String>) -> Self {
        Self { depth, path, equation: None, primitive: None }
    }

    pub fn with_equation(mut self, index: usize, primitive: &str) -> Self {
        self.equation = Some(index);
        self.primitive = Some(primitive.to_string());
        self
    }
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "depth {}", self.depth)?;
        if !self.path.is_empty() {
            write!(f, " in {}", self.path.join("/"))?;
        }
        if let Some(index) = self.equation {
            write!(f, ", equation #{}", index)?;
        }
        if let Some(primitive) = &self.primitive {
            write!(f, " ({})", primitive)?;
        }
        Ok(())
    }
}
