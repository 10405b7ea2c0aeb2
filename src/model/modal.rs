use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub text: String,
}

/// What a modal dialog shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalContent {
    pub title: String,
    pub description: Option<String>,
    pub link: Option<Link>,
}

impl ModalContent {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), description: None, link: None }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_link(mut self, href: impl Into<String>, text: impl Into<String>) -> Self {
        self.link = Some(Link { href: href.into(), text: text.into() });
        self
    }

    pub fn game_instruction() -> Self {
        Self::new("Game Instruction")
            .with_description("Use the WASD, arrow keys or press for joystick to move the character.")
    }
}

/// Receiver of open/close requests from gameplay code.
pub trait ModalSink {
    fn open_modal(&mut self, content: &ModalContent);
    fn close_modal(&mut self);
}

/// Open/close state of the single dialog. Drawn by the overlay.
#[derive(Debug, Default)]
pub struct ModalManager {
    current: Option<ModalContent>,
    opened: usize,
    closed: usize,
}

impl ModalManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&ModalContent> {
        self.current.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Number of open requests received so far.
    pub fn open_count(&self) -> usize {
        self.opened
    }

    pub fn close_count(&self) -> usize {
        self.closed
    }
}

impl ModalSink for ModalManager {
    fn open_modal(&mut self, content: &ModalContent) {
        debug!(title = %content.title, "open modal");
        self.opened += 1;
        self.current = Some(content.clone());
    }

    fn close_modal(&mut self) {
        debug!("close modal");
        self.closed += 1;
        self.current = None;
    }
}

/// Dialog content for each portal in the environment, keyed by portal name.
pub fn portal_content(name: &str) -> Option<ModalContent> {
    match name {
        "aboutMe" => Some(ModalContent::new("About me").with_description("Hello! I am Sean, a web developer.")),
        "projects" => Some(ModalContent::new("Projects").with_link("https://sean-j.dev/projects", "Check out my projects")),
        "contactMe" => Some(ModalContent::new("Let's connect").with_link("https://github.com/seanjiangsh", "Github")),
        _ => None,
    }
}
