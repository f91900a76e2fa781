mod plugins;
mod voice;
