//! Key remaps from PyTorch state dicts to the burn module layout.

/// VGG16 `features` index of every conv, grouped by block.
const VGG_CONVS: [&[usize]; 5] = [&[0, 2], &[5, 7], &[10, 12, 14], &[17, 19, 21], &[24, 26, 28]];

/// Remaps for a full `lpips.LPIPS(net="vgg")` state dict.
///
/// Convs are accepted either as `net.sliceK.N` (lpips) or `features.N` (torchvision).
pub fn lpips_remaps() -> Vec<(String, String)> {
    let mut remaps = vec![];
    for (block, convs) in VGG_CONVS.iter().enumerate() {
        for (conv, feature) in convs.iter().enumerate() {
            let target = format!("blocks.{block}.convs.{conv}.conv.$1");
            remaps.push((
                format!(r"^net\.slice{}\.{feature}\.(weight|bias)$", block + 1),
                target.clone(),
            ));
            remaps.push((format!(r"^features\.{feature}\.(weight|bias)$"), target));
        }
    }
    for k in 0..VGG_CONVS.len() {
        remaps.push((
            format!(r"^lin{k}\.model\.1\.weight$"),
            format!("lins.{k}.lin.weight"),
        ));
    }
    remaps
}

fn res_block(from: &str, to: &str) -> [(String, String); 2] {
    [
        (format!(r"^{from}\.res\.0\.weight$"), format!("{to}.conv1.weight")),
        (format!(r"^{from}\.res\.2\.weight$"), format!("{to}.conv2.weight")),
    ]
}

/// Remaps for a USRNet state dict with `nb` residual blocks per stage.
pub fn usrnet_remaps(nb: usize) -> Vec<(String, String)> {
    let mut remaps = vec![];

    for (layer, conv) in [(0, 1), (2, 2), (4, 3)] {
        remaps.push((
            format!(r"^h\.mlp\.{layer}\.(weight|bias)$"),
            format!("hypa.conv{conv}.$1"),
        ));
    }

    remaps.push((r"^p\.m_head\.weight$".to_owned(), "prior.head.weight".to_owned()));
    remaps.push((r"^p\.m_tail\.weight$".to_owned(), "prior.tail.weight".to_owned()));

    for j in 0..nb {
        remaps.extend(res_block(
            &format!(r"p\.m_body\.{j}"),
            &format!("prior.body.{j}"),
        ));
    }

    for stage in 0..3 {
        // Down stages are numbered from the top, up stages from the bottom.
        let down = format!(r"p\.m_down{}", stage + 1);
        let up = format!(r"p\.m_up{}", 3 - stage);

        for j in 0..nb {
            remaps.extend(res_block(
                &format!(r"{down}\.{j}"),
                &format!("prior.downs.{stage}.blocks.{j}"),
            ));
            remaps.extend(res_block(
                &format!(r"{up}\.{}", j + 1),
                &format!("prior.ups.{stage}.blocks.{j}"),
            ));
        }
        remaps.push((
            format!(r"^{down}\.{nb}\.weight$"),
            format!("prior.downs.{stage}.down.weight"),
        ));
        remaps.push((
            format!(r"^{up}\.0\.weight$"),
            format!("prior.ups.{stage}.up.weight"),
        ));
    }
    remaps
}
